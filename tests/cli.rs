use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::Value;

use comfy_provision::cli::{PatchCli, ProvisionCli, parse_args, run_patch_workflow};

fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn patcher_without_arguments_exits_one() {
    assert_eq!(run_patch_workflow(["patch-workflow"]), 1);
}

#[test]
fn patcher_with_extra_argument_exits_one() {
    assert_eq!(run_patch_workflow(["patch-workflow", "a.json", "b.json", "c.json"]), 1);
}

#[test]
fn patcher_missing_input_exits_one() {
    let (_temp, dir) = temp_dir();
    let input = dir.join("missing.json");
    let output = dir.join("out.json");
    assert_eq!(
        run_patch_workflow(["patch-workflow", input.as_str(), output.as_str()]),
        1
    );
    assert!(!output.as_std_path().exists());
}

#[test]
fn patcher_success_writes_output() {
    let (_temp, dir) = temp_dir();
    let input = dir.join("workflow.json");
    let output = dir.join("workflow_cuda.json");
    std::fs::write(
        input.as_std_path(),
        r#"{"nodes": [{"widgets_values": ["mps", "fp32", "eager"]}]}"#,
    )
    .unwrap();

    assert_eq!(
        run_patch_workflow(["patch-workflow", input.as_str(), output.as_str()]),
        0
    );
    let value: Value =
        serde_json::from_str(&std::fs::read_to_string(output.as_std_path()).unwrap()).unwrap();
    assert_eq!(
        value["nodes"][0]["widgets_values"],
        serde_json::json!(["cuda", "fp16", "sdpa"])
    );
}

#[test]
fn patcher_help_exits_zero() {
    assert_matches!(parse_args::<PatchCli, _, _>(["patch-workflow", "--help"]), Err(0));
}

#[test]
fn provisioner_rejects_stray_argument() {
    assert_matches!(
        parse_args::<ProvisionCli, _, _>(["comfy-provision", "extra"]),
        Err(1)
    );
    assert_matches!(parse_args::<ProvisionCli, _, _>(["comfy-provision"]), Ok(_));
    assert_matches!(
        parse_args::<ProvisionCli, _, _>(["comfy-provision", "--version"]),
        Err(0)
    );
}
