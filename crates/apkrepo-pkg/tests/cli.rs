use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A scratch working directory with an empty package store.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        std::fs::create_dir_all(temp_dir.path().join("apps/packages"))
            .expect("failed to create store");
        Self { temp_dir }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_apkrepo"));
        cmd.current_dir(self.root());
        for var in [
            "APKREPO_CONFIG",
            "APKREPO_PACKAGES_DIR",
            "APKREPO_OUTPUT_DIR",
            "APKREPO_KEYS_DIR",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().expect("failed to run apkrepo")
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("generate"));
}

#[test]
fn test_keygen_sign_verify() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["keygen", "--name", "apps.0"]).status.success());
    assert!(ctx.path("apps.0.sec").is_file());
    assert!(ctx.path("apps.0.pub").is_file());

    std::fs::write(ctx.path("notes.txt"), "release notes").unwrap();
    let output = ctx.run(&["sign", "--key", "apps.0.sec", "--input", "notes.txt"]);
    assert!(output.status.success());
    let sig = std::fs::read_to_string(ctx.path("notes.txt.sig")).unwrap();
    assert!(sig.starts_with("untrusted comment: verify with apps.0.pub\n"));

    let output = ctx.run(&[
        "verify", "--pubkey", "apps.0.pub", "--input", "notes.txt", "--sig", "notes.txt.sig",
    ]);
    assert!(output.status.success());

    std::fs::write(ctx.path("notes.txt"), "tampered notes").unwrap();
    let output = ctx.run(&[
        "verify", "--pubkey", "apps.0.pub", "--input", "notes.txt", "--sig", "notes.txt.sig",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_keygen_refuses_overwrite() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["keygen"]).status.success());
    let output = ctx.run(&["keygen"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("apps.0.sec"));
}

#[test]
fn test_generate_empty_store_signed() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["keygen"]).status.success());

    let output = ctx.run(&["generate"]);
    assert!(
        output.status.success(),
        "generate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let doc = std::fs::read(ctx.path("apps/metadata.1.json")).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&doc).unwrap();
    assert_eq!(value["packages"], serde_json::json!({}));
    assert!(value["time"].as_i64().unwrap() > 0);

    assert!(ctx.path("apps/metadata.1.json.0.sig").is_file());
    let output = ctx.run(&[
        "verify",
        "--pubkey",
        "apps.0.pub",
        "--input",
        "apps/metadata.1.0.sjson",
    ]);
    assert!(output.status.success());
}

#[test]
fn test_config_file_and_flag_override() {
    let ctx = TestContext::new();
    std::fs::create_dir_all(ctx.path("store")).unwrap();
    std::fs::write(
        ctx.path("apkrepo.toml"),
        "packages_dir = \"store\"\noutput_dir = \"from-config\"\n",
    )
    .unwrap();

    let output = ctx.run(&["--output", "from-flag", "generate"]);
    assert!(output.status.success());
    assert!(ctx.path("from-flag/metadata.1.json").is_file());
    assert!(!ctx.path("from-config").exists());
}

#[test]
fn test_generate_fails_on_invalid_store() {
    let ctx = TestContext::new();
    let pkg = ctx.path("apps/packages/com.example.app");
    std::fs::create_dir_all(pkg.join("not-a-version")).unwrap();
    std::fs::write(pkg.join("common-props.toml"), format!("signatures = [\"{}\"]\n", "ab".repeat(32))).unwrap();

    let output = ctx.run(&["generate", "--skip-compress"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not-a-version"));
    assert!(!ctx.path("apps/metadata.1.json").exists());
}
