use super::*;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use clap::error::ErrorKind;
use clap::Parser;
use devpack_backup::{
    backup_dir_name, parse_backup_timestamp, BackupError, BackupOutcome, CleanupPlanner,
    CleanupRequest,
};

use crate::command_flows::*;
use crate::logging::level_for_verbosity;
use crate::render::*;

static TEST_PREFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_prefix() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "devpack-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test prefix");
    path
}

fn test_context() -> CliContext {
    CliContext::from_prefix(test_prefix()).expect("must load context")
}

fn make_backup(pkgs_dir: &Path, package: &str, timestamp: &str, bytes: usize) {
    let dir = pkgs_dir.join(backup_dir_name(package, timestamp));
    fs::create_dir_all(&dir).expect("must create backup dir");
    fs::write(dir.join("payload.bin"), vec![1_u8; bytes]).expect("must write payload");
}

fn plain() -> TerminalRenderer {
    TerminalRenderer::with_style(OutputStyle::Plain)
}

fn write_config(ctx: &CliContext, contents: &str) -> CliContext {
    fs::write(ctx.layout.config_path(), contents).expect("must write config");
    CliContext::from_prefix(ctx.layout.prefix().to_path_buf()).expect("must reload context")
}

#[test]
fn cli_parses_rollback_list_with_json() {
    let cli = Cli::try_parse_from(["devpack", "rollback", "list", "jdk-21", "--json"])
        .expect("command must parse");
    match cli.command {
        Commands::Rollback {
            command: RollbackCommands::List { package, json },
        } => {
            assert_eq!(package.as_deref(), Some("jdk-21"));
            assert!(json);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_restore_without_timestamp() {
    let cli = Cli::try_parse_from(["devpack", "rollback", "restore", "node"])
        .expect("command must parse");
    match cli.command {
        Commands::Rollback {
            command: RollbackCommands::Restore { package, timestamp },
        } => {
            assert_eq!(package, "node");
            assert_eq!(timestamp, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_parses_clean_backups_flags() {
    let cli = Cli::try_parse_from([
        "devpack",
        "-vv",
        "clean",
        "backups",
        "jdk-21",
        "--older-than",
        "7",
        "--keep",
        "2",
        "--dry-run",
        "-f",
    ])
    .expect("command must parse");

    assert_eq!(cli.verbose, 2);
    match cli.command {
        Commands::Clean {
            command: CleanCommands::Backups(args),
        } => {
            assert_eq!(
                args,
                CleanBackupsArgs {
                    package: Some("jdk-21".to_string()),
                    older_than: Some(7),
                    keep: Some(2),
                    dry_run: true,
                    force: true,
                    json: false,
                }
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_accepts_global_prefix_after_subcommand() {
    let cli = Cli::try_parse_from([
        "devpack",
        "backup",
        "create",
        "node",
        "--verify",
        "--prefix",
        "/opt/devpack",
    ])
    .expect("command must parse");

    assert_eq!(cli.prefix, Some(PathBuf::from("/opt/devpack")));
    assert!(matches!(
        cli.command,
        Commands::Backup {
            command: BackupCommands::Create { verify: true, .. }
        }
    ));
}

#[test]
fn cli_requires_clean_target() {
    assert!(Cli::try_parse_from(["devpack", "clean"]).is_err());
    let err = Cli::try_parse_from(["devpack", "clean", "snapshots"])
        .expect_err("unknown clean target");
    assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
}

#[test]
fn verbosity_maps_to_filter_levels() {
    assert_eq!(level_for_verbosity(0), "warn");
    assert_eq!(level_for_verbosity(1), "info");
    assert_eq!(level_for_verbosity(2), "debug");
    assert_eq!(level_for_verbosity(9), "debug");
}

#[test]
fn resolve_output_style_uses_rich_only_on_colored_tty() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "restored node"),
        "restored node"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badges() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "restored node"),
        "[OK] restored node"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "backups are disabled"),
        "[WARN] backups are disabled"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "failed to delete"),
        "[ERR] failed to delete"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "cleanup cancelled"),
        "[..] cleanup cancelled"
    );
}

#[test]
fn section_header_is_hidden_in_plain_mode() {
    assert_eq!(render_section_header(OutputStyle::Plain, "Backups"), None);
    assert_eq!(
        render_section_header(OutputStyle::Rich, "Backups").as_deref(),
        Some("== Backups ==")
    );
}

#[test]
fn confirmation_accepts_only_explicit_yes() {
    assert!(is_affirmative("y\n"));
    assert!(is_affirmative(" YES \r\n"));
    assert!(!is_affirmative("\n"));
    assert!(!is_affirmative("n"));
    assert!(!is_affirmative("yep"));
}

#[test]
fn confirm_cleanup_writes_prompt_and_reads_answer() {
    let mut output = Vec::new();
    let confirmed =
        confirm_cleanup(3, &mut Cursor::new("y\n"), &mut output).expect("must read answer");
    assert!(confirmed);
    assert_eq!(
        String::from_utf8(output).expect("utf-8"),
        "Delete 3 backup(s)? [y/N]: "
    );

    let mut output = Vec::new();
    let confirmed =
        confirm_cleanup(3, &mut Cursor::new(""), &mut output).expect("eof is a no");
    assert!(!confirmed);
}

#[test]
fn timestamp_input_must_match_backup_format() {
    assert!(validate_timestamp_input("20260201-093000").is_ok());
    let err = validate_timestamp_input("2026-02-01").expect_err("wrong format");
    assert!(err.to_string().contains("invalid backup timestamp: 2026-02-01"));
}

#[test]
fn cleanup_request_maps_cli_overrides() {
    let args = CleanBackupsArgs {
        package: Some("node".to_string()),
        older_than: Some(10),
        keep: None,
        ..CleanBackupsArgs::default()
    };
    assert_eq!(
        cleanup_request(&args),
        CleanupRequest {
            package: Some("node".to_string()),
            max_age_days: Some(10),
            keep_count: None,
        }
    );
}

#[test]
fn context_without_config_file_uses_defaults() {
    let ctx = test_context();

    assert!(!ctx.config_exists);
    assert!(ctx.config.backup.enabled);
    assert_eq!(ctx.catalog().backup_root(), ctx.layout.pkgs_dir());
    assert_eq!(ctx.catalog().policy().max_age_days, 30);
    assert_eq!(ctx.catalog().policy().keep_count, 5);

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn context_reads_backup_settings_from_config_file() {
    let ctx = test_context();
    let custom_root = ctx.layout.prefix().join("snapshots");
    let ctx = write_config(
        &ctx,
        &format!(
            "[backup]\nroot = {:?}\nmax_age_days = 7\nkeep_count = 2\n",
            custom_root.display().to_string()
        ),
    );

    assert!(ctx.config_exists);
    assert_eq!(ctx.catalog().backup_root(), custom_root.as_path());
    assert_eq!(ctx.catalog().policy().max_age_days, 7);
    assert_eq!(ctx.catalog().policy().keep_count, 2);

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn format_config_lines_reports_defaults_and_toml() {
    let ctx = test_context();
    let lines = format_config_lines(&ctx).expect("must render config");

    assert_eq!(
        lines[0],
        format!("prefix: {}", ctx.layout.prefix().display())
    );
    assert!(lines[1].ends_with("(not found, using defaults)"));
    assert_eq!(
        lines[2],
        format!("backup root: {}", ctx.layout.pkgs_dir().display())
    );
    assert!(lines.iter().any(|line| line == "[backup]"));
    assert!(lines.iter().any(|line| line == "keep_count = 5"));

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn backup_list_lines_mark_latest_and_handle_empty() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "node", "20260201-100000", 10);
    make_backup(&pkgs, "node", "20260202-100000", 10);
    let records = ctx.catalog().list_backups("node").expect("list");

    let lines = format_backup_list_lines("node", &records, OutputStyle::Rich);
    assert_eq!(lines[0], "[..] node: 2 backup(s)");
    assert!(lines[1].starts_with("  20260202-100000\t"));
    assert!(lines[1].ends_with(" (latest)"));
    assert!(lines[2].starts_with("  20260201-100000\t"));
    assert!(!lines[2].ends_with(" (latest)"));

    assert_eq!(
        format_backup_list_lines("ruby", &[], OutputStyle::Plain),
        vec!["no backups found for ruby".to_string()]
    );

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn all_backups_lines_group_packages_in_name_order() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "ruby", "20260201-100000", 1);
    make_backup(&pkgs, "my.tool", "20260201-100000", 1);
    let catalog = ctx.catalog();
    let grouped = catalog.list_all_backups().expect("list all");

    let lines = format_all_backups_lines(catalog.backup_root(), &grouped, OutputStyle::Plain);
    assert_eq!(lines[0], "my.tool: 1 backup(s)");
    assert_eq!(lines[2], "ruby: 1 backup(s)");

    let empty = format_all_backups_lines(
        catalog.backup_root(),
        &Default::default(),
        OutputStyle::Plain,
    );
    assert_eq!(
        empty,
        vec![format!("no backups found under {}", pkgs.display())]
    );

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn cleanup_preview_lines_name_reason_for_each_candidate() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    for stamp in ["20260201-100000", "20260202-100000", "20260203-100000"] {
        make_backup(&pkgs, "jdk-21", stamp, 100);
    }
    let catalog = ctx.catalog();
    let planner = CleanupPlanner::new(&catalog);
    let now = parse_backup_timestamp("20260210-000000").expect("valid timestamp");
    let preview = planner
        .preview_cleanup_at(
            &CleanupRequest {
                package: Some("jdk-21".to_string()),
                max_age_days: Some(365),
                keep_count: Some(2),
            },
            now,
        )
        .expect("preview");

    let lines = format_cleanup_preview_lines(&preview, OutputStyle::Rich);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[WARN] jdk-21 20260201-100000 "));
    assert!(lines[0].ends_with("(exceeds keep-count of 2)"));
    assert!(lines[1].starts_with("[..] 1 of 3 backup(s) selected"));

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_dry_run_leaves_backups_in_place() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "node", "20200101-000000", 1);
    let args = CleanBackupsArgs {
        dry_run: true,
        ..CleanBackupsArgs::default()
    };

    let mut output = Vec::new();
    run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new("y\n"), &mut output)
        .expect("dry run");

    let rendered = String::from_utf8(output).expect("utf-8");
    assert!(rendered.contains("node 20200101-000000"));
    assert!(!rendered.contains("[y/N]"));
    assert_eq!(ctx.catalog().list_backups("node").expect("list").len(), 1);

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_declined_prompt_deletes_nothing() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "node", "20200101-000000", 1);

    let mut output = Vec::new();
    run_clean_backups_with_io(
        &ctx,
        &CleanBackupsArgs::default(),
        plain(),
        &mut Cursor::new("n\n"),
        &mut output,
    )
    .expect("declined cleanup");

    let rendered = String::from_utf8(output).expect("utf-8");
    assert!(rendered.contains("Delete 1 backup(s)? [y/N]: "));
    assert!(rendered.contains("cleanup cancelled"));
    assert_eq!(ctx.catalog().list_backups("node").expect("list").len(), 1);

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_force_deletes_without_prompt() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "node", "20200101-000000", 1);
    let args = CleanBackupsArgs {
        force: true,
        ..CleanBackupsArgs::default()
    };

    let mut output = Vec::new();
    run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new(""), &mut output)
        .expect("forced cleanup");

    let rendered = String::from_utf8(output).expect("utf-8");
    assert!(!rendered.contains("[y/N]"));
    assert!(rendered.contains("cleanup summary: deleted=1 failed=0"));
    assert!(ctx.catalog().list_backups("node").expect("list").is_empty());

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_json_needs_non_interactive_mode() {
    let ctx = test_context();
    let args = CleanBackupsArgs {
        json: true,
        ..CleanBackupsArgs::default()
    };

    let err =
        run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new(""), &mut Vec::new())
            .expect_err("interactive json must fail");
    assert!(err.to_string().contains("--json requires --dry-run or --force"));

    let args = CleanBackupsArgs {
        json: true,
        dry_run: true,
        ..CleanBackupsArgs::default()
    };
    let mut output = Vec::new();
    run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new(""), &mut output)
        .expect("json dry run");
    let value: serde_json::Value =
        serde_json::from_slice(&output).expect("output must be json");
    assert_eq!(value["policy"]["keep_count"], 5);
    assert!(value["items"].as_array().expect("items array").is_empty());

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn backup_create_then_restore_round_trips_installation() {
    let ctx = test_context();
    let install_dir = ctx.layout.package_dir("node");
    fs::create_dir_all(install_dir.join("bin")).expect("must create install dir");
    fs::write(install_dir.join("bin/node"), b"v20").expect("must write binary");

    run_backup_create(&ctx, "node", true).expect("backup with verification");
    let latest = ctx
        .catalog()
        .latest_backup("node")
        .expect("list")
        .expect("backup must exist");

    fs::write(install_dir.join("bin/node"), b"v22-broken").expect("must overwrite");
    fs::write(install_dir.join("stray.txt"), b"stray").expect("must write stray");

    run_rollback_restore(&ctx, "node", Some(&latest.timestamp_str)).expect("restore");
    assert_eq!(fs::read(install_dir.join("bin/node")).expect("node"), b"v20");
    assert!(!install_dir.join("stray.txt").exists());

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn backup_create_is_a_noop_when_disabled() {
    let ctx = test_context();
    let ctx = write_config(&ctx, "[backup]\nenabled = false\n");
    let install_dir = ctx.layout.package_dir("node");
    fs::create_dir_all(&install_dir).expect("must create install dir");
    fs::write(install_dir.join("a.txt"), b"a").expect("must write file");

    run_backup_create(&ctx, "node", false).expect("disabled backup is not an error");
    assert!(ctx.catalog().list_backups("node").expect("list").is_empty());

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn backup_create_of_missing_package_surfaces_typed_error() {
    let ctx = test_context();

    let err = run_backup_create(&ctx, "ghost", false).expect_err("missing install dir");
    assert!(err.to_string().contains("backup of ghost failed"));
    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::SourceMissing { .. })
    ));

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn successful_backup_path_rejects_failed_outcome() {
    let outcome = BackupOutcome::failed(
        "node",
        "20260201-100000",
        BackupError::BackupExists {
            path: PathBuf::from("/tmp/node.backup-20260201-100000"),
        },
    );
    let err = successful_backup_path(&outcome).expect_err("failed outcome");
    assert!(format!("{err:#}").contains("already exists"));
    assert!(format_backup_outcome_lines(&outcome, OutputStyle::Rich).is_empty());
}

#[test]
fn restore_rejects_malformed_timestamp_before_touching_disk() {
    let ctx = test_context();
    let install_dir = ctx.layout.package_dir("node");
    fs::create_dir_all(&install_dir).expect("must create install dir");

    let err = run_rollback_restore(&ctx, "node", Some("latest")).expect_err("bad timestamp");
    assert!(err.to_string().contains("invalid backup timestamp"));
    assert!(install_dir.exists());

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn backup_create_writes_into_configured_backup_root() {
    let ctx = test_context();
    let custom_root = ctx.layout.prefix().join("custom-backups");
    let ctx = write_config(
        &ctx,
        &format!("[backup]\nroot = {:?}\n", custom_root.display().to_string()),
    );
    let install_dir = ctx.layout.package_dir("node");
    fs::create_dir_all(&install_dir).expect("must create install dir");
    fs::write(install_dir.join("a.txt"), b"v20").expect("must write file");

    run_backup_create(&ctx, "node", false).expect("backup into custom root");

    let catalog = ctx.catalog();
    assert_eq!(catalog.backup_root(), custom_root.as_path());
    let backups = catalog.list_backups("node").expect("list");
    assert_eq!(backups.len(), 1);
    assert!(backups[0].path.starts_with(&custom_root));
    let sibling = ctx
        .layout
        .pkgs_dir()
        .join(backup_dir_name("node", &backups[0].timestamp_str));
    assert!(!sibling.exists());

    fs::write(install_dir.join("a.txt"), b"v22").expect("must overwrite");
    run_rollback_restore(&ctx, "node", None).expect("restore latest from custom root");
    assert_eq!(fs::read(install_dir.join("a.txt")).expect("a.txt"), b"v20");

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_json_reports_reason_text() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    for timestamp in ["29990101-000000", "29990102-000000", "29990103-000000"] {
        make_backup(&pkgs, "node", timestamp, 1);
    }
    let args = CleanBackupsArgs {
        keep: Some(2),
        json: true,
        dry_run: true,
        ..CleanBackupsArgs::default()
    };

    let mut output = Vec::new();
    run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new(""), &mut output)
        .expect("json dry run");
    let value: serde_json::Value =
        serde_json::from_slice(&output).expect("output must be json");
    let items = value["items"].as_array().expect("items array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["backup"]["timestamp_raw"], "29990101-000000");
    assert_eq!(items[0]["reason"], "exceeds keep-count of 2");

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn clean_backups_writes_section_header_to_injected_output() {
    let ctx = test_context();
    let pkgs = ctx.layout.pkgs_dir();
    make_backup(&pkgs, "node", "20200101-000000", 1);
    let args = CleanBackupsArgs {
        dry_run: true,
        ..CleanBackupsArgs::default()
    };

    let mut output = Vec::new();
    run_clean_backups_with_io(
        &ctx,
        &args,
        TerminalRenderer::with_style(OutputStyle::Rich),
        &mut Cursor::new(""),
        &mut output,
    )
    .expect("rich dry run");

    let rendered = String::from_utf8(output).expect("utf-8");
    let header = rendered.find("== Backup cleanup ==").expect("header in output");
    let item = rendered.find("[WARN] node 20200101-000000").expect("item in output");
    assert!(header < item);

    let mut plain_output = Vec::new();
    run_clean_backups_with_io(&ctx, &args, plain(), &mut Cursor::new(""), &mut plain_output)
        .expect("plain dry run");
    let rendered = String::from_utf8(plain_output).expect("utf-8");
    assert!(!rendered.contains("Backup cleanup"));
    assert!(rendered.starts_with("node 20200101-000000"));

    let _ = fs::remove_dir_all(ctx.layout.prefix());
}

#[test]
fn section_lines_render_only_in_rich_mode() {
    assert!(TerminalRenderer::with_style(OutputStyle::Plain)
        .section_lines("Backups")
        .is_empty());
    let lines = TerminalRenderer::with_style(OutputStyle::Rich).section_lines("Backups");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].is_empty());
    assert!(lines[1].contains("== Backups =="));
}
