//! Integration tests for lookaside

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    /// Command isolated from the user's config and any local config
    fn lookaside(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("lookaside");
        cmd.arg("-c")
            .arg(dir.path().join("config.toml"))
            .arg("--no-local")
            .arg("-C")
            .arg(dir.path())
            .env_remove("LOOKASIDE_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("lookaside")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("lookaside cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("lookaside")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lookaside"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        lookaside(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        lookaside(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("hash = \"sha512\""));
    }

    #[test]
    fn config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        lookaside(&dir).args(["config", "init"]).assert().success();

        let written = fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(written.contains("[workspace]"));
    }

    #[test]
    fn invalid_config_reports_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "[cache\n").unwrap();

        lookaside(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("config.toml"));
    }

    #[test]
    fn sources_without_manifest() {
        let dir = TempDir::new().unwrap();
        lookaside(&dir)
            .arg("sources")
            .assert()
            .success()
            .stdout(predicate::str::contains("No sources listed"));
    }

    #[test]
    fn sources_rejects_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sources"), "this is not a sources line\n").unwrap();

        lookaside(&dir)
            .arg("sources")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Malformed line 1"));
    }

    #[test]
    fn sources_without_download_url() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            "d41d8cd98f00b204e9800998ecf8427e  empty.tar.gz\n",
        )
        .unwrap();

        lookaside(&dir)
            .arg("sources")
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache.download_url"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn sources_with_malformed_download_url() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "[cache]\ndownload_url = \"pkgs.example.org/repo\"\n").unwrap();
        fs::write(
            dir.path().join("sources"),
            "d41d8cd98f00b204e9800998ecf8427e  empty.tar.gz\n",
        )
        .unwrap();

        lookaside(&dir)
            .arg("sources")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache URL pkgs.example.org/repo"));
    }

    #[test]
    fn upload_missing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[cache]\ndownload_url = \"http://127.0.0.1:9/repo\"\nupload_url = \"http://127.0.0.1:9/upload.cgi\"\n",
        )
        .unwrap();

        lookaside(&dir)
            .args(["upload", "does-not-exist.tar.gz"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
        assert!(!dir.path().join("sources").exists());
    }

    #[test]
    fn upload_without_upload_url() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[cache]\ndownload_url = \"http://127.0.0.1:9/repo\"\n",
        )
        .unwrap();
        let file = dir.path().join("foo-1.0.tar.gz");
        fs::write(&file, b"payload").unwrap();

        lookaside(&dir)
            .arg("upload")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache.upload_url"))
            .stderr(predicate::str::contains("Hint:"));
        assert!(!dir.path().join("sources").exists());
        assert!(!dir.path().join(".gitignore").exists());
    }

    #[test]
    fn verify_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            "d41d8cd98f00b204e9800998ecf8427e  empty.tar.gz\n",
        )
        .unwrap();

        lookaside(&dir)
            .arg("verify")
            .assert()
            .failure()
            .stdout(predicate::str::contains("empty.tar.gz"))
            .stderr(predicate::str::contains("1 of 1 source file(s) missing or modified"));
    }

    #[test]
    fn verify_accepts_matching_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            "d41d8cd98f00b204e9800998ecf8427e  empty.tar.gz\n",
        )
        .unwrap();
        fs::write(dir.path().join("empty.tar.gz"), b"").unwrap();

        lookaside(&dir)
            .arg("verify")
            .assert()
            .success()
            .stdout(predicate::str::contains("1 source file(s) verified"));
    }

    #[test]
    fn status_json() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            "d41d8cd98f00b204e9800998ecf8427e  empty.tar.gz\nd41d8cd98f00b204e9800998ecf8427e  gone.patch\n",
        )
        .unwrap();
        fs::write(dir.path().join("empty.tar.gz"), b"").unwrap();

        let output = lookaside(&dir)
            .args(["status", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let statuses: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(statuses[0]["filename"], "empty.tar.gz");
        assert_eq!(statuses[0]["algorithm"], "md5");
        assert_eq!(statuses[0]["local"], "present");
        assert_eq!(statuses[1]["local"], "missing");
        assert!(statuses[1].get("remote").is_none());
    }

    #[test]
    fn status_plain() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            "SHA512 (foo.tar.gz) = cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e\n",
        )
        .unwrap();
        fs::write(dir.path().join("foo.tar.gz"), b"not empty").unwrap();

        lookaside(&dir)
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("foo.tar.gz mismatch"));
    }
}

mod cache_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use httpmock::prelude::*;
    use lookaside::hash::HashAlgorithm;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const BODY: &[u8] = b"hello lookaside";

    fn lookaside(dir: &TempDir, server: &MockServer) -> Command {
        fs::write(
            dir.path().join("config.toml"),
            format!(
                "[cache]\ndownload_url = \"{base}/repo\"\nupload_url = \"{base}/upload.cgi\"\npackage = \"foo\"\nnamespace = \"rpms\"\nhash = \"sha256\"\nretries = 1\n",
                base = server.base_url()
            ),
        )
        .unwrap();

        let mut cmd = cargo_bin_cmd!("lookaside");
        cmd.arg("-c")
            .arg(dir.path().join("config.toml"))
            .arg("--no-local")
            .arg("-C")
            .arg(dir.path())
            .env_remove("LOOKASIDE_CONFIG");
        cmd
    }

    fn object_path(digest: &str) -> String {
        format!("/repo/rpms/foo/foo-1.0.tar.gz/sha256/{}/foo-1.0.tar.gz", digest)
    }

    #[test]
    fn sources_downloads_and_verifies() {
        let digest = HashAlgorithm::Sha256.digest_bytes(BODY);
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(object_path(&digest));
            then.status(200).body(BODY);
        });

        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            format!("SHA256 (foo-1.0.tar.gz) = {}\n", digest),
        )
        .unwrap();

        lookaside(&dir, &server).arg("sources").assert().success();
        mock.assert_hits(1);
        assert_eq!(fs::read(dir.path().join("foo-1.0.tar.gz")).unwrap(), BODY);

        // Second run finds the verified file and stays offline
        lookaside(&dir, &server)
            .arg("sources")
            .assert()
            .success()
            .stdout(predicate::str::contains("already present"));
        mock.assert_hits(1);
    }

    #[test]
    fn sources_reports_missing_objects() {
        let digest = HashAlgorithm::Sha256.digest_bytes(BODY);
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(object_path(&digest));
            then.status(404);
        });

        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sources"),
            format!("SHA256 (foo-1.0.tar.gz) = {}\n", digest),
        )
        .unwrap();

        lookaside(&dir, &server)
            .arg("sources")
            .assert()
            .failure()
            .stderr(predicate::str::contains("1 source file(s) could not be retrieved"))
            .stderr(predicate::str::contains("foo-1.0.tar.gz: not found"));
        assert!(!dir.path().join("foo-1.0.tar.gz").exists());
    }

    #[test]
    fn new_sources_uploads_and_records() {
        let server = MockServer::start();
        let check = server.mock(|when, then| {
            when.method(POST)
                .path("/upload.cgi")
                .body_contains("name=\"filename\"")
                .body_contains("foo-1.0.tar.gz");
            then.status(200).body("Missing\n");
        });
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/upload.cgi")
                .body_contains("filename=\"foo-1.0.tar.gz\"")
                .body_contains("hello lookaside");
            then.status(200).body("File foo-1.0.tar.gz size 15 stored");
        });

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("foo-1.0.tar.gz");
        fs::write(&file, BODY).unwrap();

        lookaside(&dir, &server)
            .arg("new-sources")
            .arg(&file)
            .assert()
            .success();

        check.assert_hits(1);
        upload.assert_hits(1);
        let manifest = fs::read_to_string(dir.path().join("sources")).unwrap();
        assert_eq!(
            manifest,
            format!("sha256 {}  foo-1.0.tar.gz\n", HashAlgorithm::Sha256.digest_bytes(BODY))
        );
        let ignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == "/foo-1.0.tar.gz"));
    }

    #[test]
    fn upload_rejected_credentials_leave_workspace_untouched() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/upload.cgi");
            then.status(403);
        });

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("foo-1.0.tar.gz");
        fs::write(&file, BODY).unwrap();

        lookaside(&dir, &server)
            .arg("upload")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to register foo-1.0.tar.gz"))
            .stderr(predicate::str::contains("kinit"));
        assert!(!dir.path().join("sources").exists());
        assert!(!dir.path().join(".gitignore").exists());
    }
}
