use std::fs;

use camino::Utf8PathBuf;

use comfy_provision::config::Paths;
use comfy_provision::layout::{self, MODEL_DIRS};
use comfy_provision::manifest::Manifest;

fn temp_paths() -> (tempfile::TempDir, Paths) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Paths::new(root))
}

#[test]
fn create_directories_builds_full_tree() {
    let (_temp, paths) = temp_paths();
    layout::create_directories(&paths).unwrap();
    for name in MODEL_DIRS {
        assert!(paths.models_root().join(name).as_std_path().is_dir(), "{name}");
    }
    assert!(paths.llm_root().as_std_path().is_dir());
    assert!(paths.input_root().as_std_path().is_dir());

    // Second call is a no-op.
    layout::create_directories(&paths).unwrap();
}

#[test]
fn flat_check_counts_one_violation_per_nested_dir() {
    let (_temp, paths) = temp_paths();
    let manifest = Manifest::embedded().unwrap();
    layout::create_directories(&paths).unwrap();

    let check = layout::verify_flat_structure(&manifest, &paths);
    assert!(check.is_flat());
    assert_eq!(check.error_count(), 0);

    let nested = paths.models_root().join("upscale_models/ESRGAN");
    fs::create_dir_all(nested.as_std_path()).unwrap();
    let check = layout::verify_flat_structure(&manifest, &paths);
    assert_eq!(check.error_count(), 1);
    assert_eq!(check.violations[0].name, "4x-UltraSharp");
    assert_eq!(check.violations[0].path, nested);
}

#[test]
fn purge_removes_every_cache_dir() {
    let (_temp, paths) = temp_paths();
    layout::create_directories(&paths).unwrap();
    let vae_cache = paths.models_root().join("vae/.cache/huggingface");
    let clip_cache = paths.models_root().join("clip/.cache");
    fs::create_dir_all(vae_cache.as_std_path()).unwrap();
    fs::create_dir_all(clip_cache.as_std_path()).unwrap();
    fs::write(clip_cache.join("partial").as_std_path(), b"x").unwrap();

    let removed = layout::purge_cache_dirs(&paths).unwrap();
    assert_eq!(removed, 2);
    assert!(!paths.models_root().join("vae/.cache").as_std_path().exists());
    assert!(!clip_cache.as_std_path().exists());
    assert!(paths.models_root().join("vae").as_std_path().is_dir());
}

#[test]
fn count_files_by_extension() {
    let (_temp, paths) = temp_paths();
    layout::create_directories(&paths).unwrap();
    let files = [
        paths.models_root().join("vae/ae.safetensors"),
        paths.models_root().join("checkpoints/model.safetensors"),
        paths.models_root().join("unet/flux1-dev-Q8_0.gguf"),
        paths.models_root().join("depth/depth_anything_vitl14.pth"),
        paths.llm_root().join("Florence-2-large/model.safetensors"),
        paths.llm_root().join("Florence-2-large/config.json"),
    ];
    for file in &files {
        fs::create_dir_all(file.parent().unwrap().as_std_path()).unwrap();
        fs::write(file.as_std_path(), b"weights").unwrap();
    }

    let counts = layout::count_files(&paths).unwrap();
    assert_eq!(counts.safetensors, 3);
    assert_eq!(counts.gguf, 1);
    assert_eq!(counts.pth, 1);
}
