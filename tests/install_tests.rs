#![cfg(unix)]


use morlock::catalog::{Origin, ReleaseCatalog};
use morlock::error::MorlockError;
use morlock::installer::{InstallOptions, Installer};
use morlock::lock::PackageLock;
use morlock::receipt::InstallReceipt;
use morlock::registry::Registry;
use morlock::{PackageIdentity, bootstrap};
use std::fs;
use std::time::Duration;
use test_helpers::*;

const SCRIPT: &str = r#"
app = "tool"

[[steps]]
run = "echo $MORLOCK_VERSION > built.txt"
"#;

fn tool() -> PackageIdentity {
    PackageIdentity::github("acme", "tool", "tool")
}

fn releases(versions: &[&str]) -> Vec<Release> {
    versions
        .iter()
        .map(|version| Release::with_tool("tool", version))
        .collect()
}

fn refresh() -> InstallOptions {
    InstallOptions {
        refresh: true,
        as_dependency: false,
    }
}

#[tokio::test]
async fn test_fresh_install_links_launcher() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "1.2"]));

    let result = Installer::new(&env.ctx)
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(result.version, v("1.2"));
    assert!(!result.already_installed);

    let folder = env.install_folder(&tool());
    let version_dir = folder.join("1.2");
    assert_eq!(result.path, version_dir);
    assert!(version_dir.join("bin/tool").is_file());
    assert!(version_dir.join("README").is_file());
    assert_eq!(fs::read_to_string(version_dir.join("built.txt")).unwrap(), "1.2\n");
    assert!(folder.join("archives/1.2/tool-1.2.tar.gz").is_file());
    assert!(folder.join("install.script").is_file());
    assert!(folder.join("cache.json").is_file());
    assert!(!folder.join(".staging-1.2").exists());
    assert!(!folder.join(".morlock.lock").exists());

    let launcher = env.launcher("tool");
    assert_eq!(result.launcher, launcher);
    assert_eq!(fs::read_link(&launcher).unwrap(), version_dir.join("bin/tool"));

    let receipt = InstallReceipt::read(&version_dir).unwrap();
    assert_eq!(receipt.executable, "bin/tool");
    assert!(receipt.installed_on_request);
    assert!(!receipt.installed_as_dependency);

    let record = Registry::new(env.config()).record(&tool()).unwrap();
    assert_eq!(record.installed_versions, vec![v("1.2")]);
    assert_eq!(record.active_version, Some(v("1.2")));
}

#[tokio::test]
async fn test_install_with_constraint() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "1.2", "2.0"]));

    let result = Installer::new(&env.ctx)
        .install(&tool(), Some(&v("1")), &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(result.version, v("1.2"));
}

#[tokio::test]
async fn test_repeated_install_makes_no_requests() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);

    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    // Broken launcher gets repaired on the way
    fs::remove_file(env.launcher("tool")).unwrap();
    env.fetcher.reset_calls();
    env.fetcher.set_offline(true);

    let again = installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    assert!(again.already_installed);
    assert_eq!(again.version, v("1.0"));
    assert_eq!(env.fetcher.calls(), 0);
    assert!(env.launcher("tool").exists());
}

#[tokio::test]
async fn test_missing_script_is_reported() {
    let env = TestEnvironment::new();

    let err = Installer::new(&env.ctx)
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MorlockError::ScriptNotFound { .. }));
    assert_eq!(err.exit_code(), 2);
    // Nothing left behind for a package that never existed
    assert!(!env.install_folder(&tool()).exists());
}

#[tokio::test]
async fn test_no_compatible_release() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));

    let err = Installer::new(&env.ctx)
        .install(&tool(), Some(&v("3")), &InstallOptions::default())
        .await
        .unwrap_err();

    match &err {
        MorlockError::NoCompatibleRelease { available, .. } => {
            assert_eq!(available, &vec!["1.0".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_download_failure_leaves_no_trace() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    env.fetcher.set_broken_downloads(true);
    let installer = Installer::new(&env.ctx);

    let err = installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MorlockError::DownloadFailed { .. }));
    assert_eq!(err.exit_code(), 4);
    let folder = env.install_folder(&tool());
    assert!(!folder.join("archives").exists());
    assert!(!folder.join("1.0").exists());
    assert!(!env.launcher("tool").exists());

    env.fetcher.set_broken_downloads(false);
    let result = installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(result.version, v("1.0"));
}

#[tokio::test]
async fn test_unpack_failure_discards_archive() {
    let env = TestEnvironment::new();
    let corrupt = Release {
        tag: "v1.0".to_string(),
        assets: vec![("tool-1.0.tar.gz".to_string(), b"not an archive".to_vec())],
    };
    env.publish(&tool(), SCRIPT, &[corrupt]);

    let err = Installer::new(&env.ctx)
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MorlockError::UnpackFailed { .. }));
    assert_eq!(err.exit_code(), 5);
    let folder = env.install_folder(&tool());
    assert!(!folder.join(".staging-1.0").exists());
    assert!(!folder.join("archives/1.0/tool-1.0.tar.gz").exists());
    assert!(!folder.join("1.0").exists());
}

#[tokio::test]
async fn test_build_failure_keeps_previous_version() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    let failing = "app = \"tool\"\n\n[[steps]]\nrun = \"echo boom >&2; exit 3\"\n";
    env.publish(&tool(), failing, &releases(&["1.0", "2.0"]));

    let err = installer.install(&tool(), None, &refresh()).await.unwrap_err();

    assert!(matches!(err, MorlockError::BuildFailed { .. }));
    assert_eq!(err.exit_code(), 6);
    assert!(err.diagnostics().is_some_and(|out| out.contains("boom")));

    let folder = env.install_folder(&tool());
    assert!(!folder.join("2.0").exists());
    assert!(!folder.join(".staging-2.0").exists());
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("1.0/bin/tool")
    );
    assert_eq!(
        Registry::new(env.config()).active_version(&tool()),
        Some(v("1.0"))
    );
}

#[tokio::test]
async fn test_link_failure_rolls_back_version() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    fs::create_dir_all(env.home()).unwrap();
    fs::write(env.config().bin_dir(), "not a folder").unwrap();

    let err = Installer::new(&env.ctx)
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MorlockError::LinkFailed { .. }));
    assert_eq!(err.exit_code(), 7);
    let folder = env.install_folder(&tool());
    assert!(!folder.join("1.0").exists());
    assert!(!folder.join(".staging-1.0").exists());
    assert!(Registry::new(env.config()).list_installed(&tool()).unwrap().is_empty());
}

#[tokio::test]
async fn test_locked_package_is_refused() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let folder = env.install_folder(&tool());
    let held = PackageLock::acquire(&folder, "acme/tool").unwrap();

    let err = Installer::new(&env.ctx)
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, MorlockError::PackageLocked { .. }));
    assert_eq!(err.exit_code(), 8);
    assert!(held.path().exists());
    assert!(Registry::new(env.config()).list_installed(&tool()).unwrap().is_empty());
}

#[tokio::test]
async fn test_uninstall_relinks_highest_remaining() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0", "3.0"]));
    let installer = Installer::new(&env.ctx);
    for version in ["1.0", "2.0", "3.0"] {
        installer
            .install(&tool(), Some(&v(version)), &InstallOptions::default())
            .await
            .unwrap();
    }
    let folder = env.install_folder(&tool());
    let registry = Registry::new(env.config());
    assert_eq!(registry.active_version(&tool()), Some(v("3.0")));

    let result = installer.uninstall(&tool(), Some(&v("3.0"))).unwrap();
    assert_eq!(result.active, Some(v("2.0")));
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("2.0/bin/tool")
    );
    assert!(!folder.join("3.0").exists());
    assert!(!folder.join("archives/3.0").exists());

    // Removing an inactive version leaves the launcher alone
    let result = installer.uninstall(&tool(), Some(&v("1.0"))).unwrap();
    assert_eq!(result.active, Some(v("2.0")));
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("2.0/bin/tool")
    );

    let result = installer.uninstall(&tool(), Some(&v("2.0"))).unwrap();
    assert_eq!(result.active, None);
    assert!(fs::symlink_metadata(env.launcher("tool")).is_err());
    assert!(registry.list_installed(&tool()).unwrap().is_empty());
}

#[tokio::test]
async fn test_uninstall_after_unlink_leaves_bin_alone() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0"]));
    let installer = Installer::new(&env.ctx);
    for version in ["1.0", "2.0"] {
        installer
            .install(&tool(), Some(&v(version)), &InstallOptions::default())
            .await
            .unwrap();
    }
    installer.unlink(&tool()).unwrap();

    let result = installer.uninstall(&tool(), Some(&v("1.0"))).unwrap();

    assert_eq!(result.active, None);
    assert!(fs::symlink_metadata(env.launcher("tool")).is_err());
    let record = Registry::new(env.config()).record(&tool()).unwrap();
    assert_eq!(record.installed_versions, vec![v("2.0")]);
    assert_eq!(record.active_version, None);
}

#[tokio::test]
async fn test_uninstall_moves_launcher_left_on_removed_version() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0"]));
    let installer = Installer::new(&env.ctx);
    for version in ["1.0", "2.0"] {
        installer
            .install(&tool(), Some(&v(version)), &InstallOptions::default())
            .await
            .unwrap();
    }
    let folder = env.install_folder(&tool());
    // Launcher still on 2.0 but the active marker is gone
    fs::remove_file(folder.join("active_version.txt")).unwrap();

    let result = installer.uninstall(&tool(), Some(&v("2.0"))).unwrap();

    assert_eq!(result.active, Some(v("1.0")));
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("1.0/bin/tool")
    );
}

#[tokio::test]
async fn test_uninstall_accepts_unique_compatible_version() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "1.2", "2.0"]));
    let installer = Installer::new(&env.ctx);
    for version in ["1.0", "1.2", "2.0"] {
        installer
            .install(&tool(), Some(&v(version)), &InstallOptions::default())
            .await
            .unwrap();
    }

    let result = installer.uninstall(&tool(), Some(&v("2"))).unwrap();
    assert_eq!(result.removed, vec![v("2.0")]);

    let err = installer.uninstall(&tool(), Some(&v("1"))).unwrap_err();
    assert!(matches!(err, MorlockError::AmbiguousPackageName { .. }));
    assert_eq!(err.exit_code(), 2);

    let err = installer.uninstall(&tool(), Some(&v("3"))).unwrap_err();
    assert!(matches!(err, MorlockError::NotInstalled { .. }));
    assert_eq!(
        Registry::new(env.config()).list_installed(&tool()).unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_cancelled_build_leaves_nothing_behind() {
    let env = TestEnvironment::new();
    let slow = "app = \"tool\"\n\n[[steps]]\nrun = \"sleep 30\"\n";
    env.publish(&tool(), slow, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        installer.install(&tool(), None, &InstallOptions::default()),
    )
    .await;
    assert!(outcome.is_err());

    let folder = env.install_folder(&tool());
    assert!(!folder.join(".staging-1.0").exists());
    assert!(!folder.join("1.0").exists());
    assert!(!folder.join(".morlock.lock").exists());
    assert!(fs::symlink_metadata(env.launcher("tool")).is_err());
    assert!(Registry::new(env.config()).list_installed(&tool()).unwrap().is_empty());

    // The lock was released with the cancelled install
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let result = installer.install(&tool(), None, &refresh()).await.unwrap();
    assert_eq!(result.version, v("1.0"));
}

#[tokio::test]
async fn test_uninstall_all_keeps_local_script() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();
    let folder = env.install_folder(&tool());
    fs::write(folder.join("local-script"), SCRIPT).unwrap();

    let result = installer.uninstall(&tool(), None).unwrap();

    assert_eq!(result.removed, vec![v("1.0")]);
    assert!(fs::symlink_metadata(env.launcher("tool")).is_err());
    let remaining: Vec<String> = fs::read_dir(&folder)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining, vec!["local-script".to_string()]);

    let err = installer.uninstall(&tool(), None).unwrap_err();
    assert!(matches!(err, MorlockError::NotInstalled { .. }));
}

#[tokio::test]
async fn test_uninstall_all_prunes_empty_folders() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    installer.uninstall(&tool(), None).unwrap();

    assert!(!env.config().packages_dir().join("acme").exists());
}

#[tokio::test]
async fn test_link_and_unlink() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0"]));
    let installer = Installer::new(&env.ctx);
    for version in ["1.0", "2.0"] {
        installer
            .install(&tool(), Some(&v(version)), &InstallOptions::default())
            .await
            .unwrap();
    }
    let folder = env.install_folder(&tool());

    let record = installer.link(&tool(), Some(&v("1"))).unwrap();
    assert_eq!(record.active_version, Some(v("1.0")));
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("1.0/bin/tool")
    );

    let record = installer.unlink(&tool()).unwrap();
    assert_eq!(record.active_version, None);
    assert_eq!(record.installed_versions, vec![v("1.0"), v("2.0")]);
    assert!(fs::symlink_metadata(env.launcher("tool")).is_err());

    // Relinks the highest version when nothing is active
    let record = installer.link(&tool(), None).unwrap();
    assert_eq!(record.active_version, Some(v("2.0")));

    let err = installer.link(&tool(), Some(&v("5"))).unwrap_err();
    assert!(matches!(err, MorlockError::NotInstalled { .. }));
}

#[tokio::test]
async fn test_cached_catalog_is_refreshed_when_nothing_matches() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();

    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0"]));
    let result = installer
        .install(&tool(), Some(&v("2")), &InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(result.version, v("2.0"));
}

#[tokio::test]
async fn test_stale_catalog_used_when_provider_down() {
    let mut env = TestEnvironment::new();
    env.ctx.config.cache_ttl = Duration::ZERO;
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let identity = tool();
    let catalog = ReleaseCatalog::new(&env.ctx, &identity);

    let listing = catalog.list_releases(false).await.unwrap();
    assert_eq!(listing.origin, Origin::Network);

    env.fetcher.set_offline(true);
    let listing = catalog.list_releases(false).await.unwrap();
    assert_eq!(listing.origin, Origin::StaleCache);
    assert_eq!(listing.assets.len(), 1);

    let err = catalog.list_releases(true).await.unwrap_err();
    assert!(matches!(err, MorlockError::ProviderUnavailable { .. }));
}

#[tokio::test]
async fn test_update_survives_provider_outage() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    installer
        .install(&tool(), None, &InstallOptions::default())
        .await
        .unwrap();
    let folder = env.install_folder(&tool());
    let cache_before = fs::read_to_string(folder.join("cache.json")).unwrap();

    env.publish(&tool(), SCRIPT, &releases(&["1.0", "2.0"]));
    env.fetcher.set_offline(true);

    let err = installer.update(&tool()).await.unwrap_err();
    assert!(matches!(err, MorlockError::ProviderUnavailable { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("1.0/bin/tool")
    );
    assert_eq!(
        fs::read_to_string(folder.join("cache.json")).unwrap(),
        cache_before
    );
    assert!(folder.join("install.script").is_file());

    env.fetcher.set_offline(false);
    let result = installer.update(&tool()).await.unwrap();
    assert!(result.changed());
    assert_eq!(result.from_version, Some(v("1.0")));
    assert_eq!(result.to_version, v("2.0"));
    assert_eq!(
        fs::read_link(env.launcher("tool")).unwrap(),
        folder.join("2.0/bin/tool")
    );
}

#[tokio::test]
async fn test_update_preserves_dependency_flag() {
    let env = TestEnvironment::new();
    env.publish(&tool(), SCRIPT, &releases(&["1.0"]));
    let installer = Installer::new(&env.ctx);
    let options = InstallOptions {
        refresh: false,
        as_dependency: true,
    };
    installer.install(&tool(), None, &options).await.unwrap();

    env.publish(&tool(), SCRIPT, &releases(&["1.0", "1.1"]));
    installer.update(&tool()).await.unwrap();

    let receipt = InstallReceipt::read(&env.install_folder(&tool()).join("1.1")).unwrap();
    assert!(receipt.installed_as_dependency);
    assert!(!receipt.installed_on_request);
}

#[tokio::test]
async fn test_bootstrap_skips_installed_targets() {
    let env = TestEnvironment::new();
    for identity in bootstrap::aliases() {
        let script = format!("app = \"{}\"\n", identity.app_name);
        env.publish(
            &identity,
            &script,
            &[Release::with_tool(&identity.app_name, "1.0")],
        );
    }

    let report = bootstrap::run(&env.ctx).await.unwrap();
    assert_eq!(report.installed.len(), 3);
    assert!(report.skipped.is_empty());
    for name in ["rogue", "rogo", "morlock"] {
        assert!(env.launcher(name).exists());
    }

    let rogue = &bootstrap::aliases()[0];
    let receipt = InstallReceipt::read(&env.install_folder(rogue).join("1.0")).unwrap();
    assert!(receipt.installed_as_dependency);

    env.fetcher.reset_calls();
    let report = bootstrap::run(&env.ctx).await.unwrap();
    assert!(report.installed.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(env.fetcher.calls(), 0);
}
