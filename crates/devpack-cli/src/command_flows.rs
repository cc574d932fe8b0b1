use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use devpack_backup::{
    default_user_prefix, parse_backup_timestamp, BackupCatalog, BackupOutcome, BackupRecord,
    CleanupPlanner, CleanupPreview, CleanupReport, CleanupRequest, PrefixLayout, SnapshotEngine,
    BACKUP_TIMESTAMP_FORMAT,
};
use devpack_core::DevpackConfig;
use indicatif::HumanBytes;
use tracing::debug;

use crate::render::{render_status_line, OutputStyle, TerminalRenderer};
use crate::CleanBackupsArgs;

/// Prefix layout plus the config loaded from it.
#[derive(Debug, Clone)]
pub(crate) struct CliContext {
    pub(crate) layout: PrefixLayout,
    pub(crate) config: DevpackConfig,
    pub(crate) config_exists: bool,
}

impl CliContext {
    pub(crate) fn load(prefix_override: Option<&Path>) -> Result<Self> {
        let prefix = match prefix_override {
            Some(prefix) => prefix.to_path_buf(),
            None => default_user_prefix()?,
        };
        Self::from_prefix(prefix)
    }

    pub(crate) fn from_prefix(prefix: PathBuf) -> Result<Self> {
        let layout = PrefixLayout::new(prefix);
        let config_path = layout.config_path();
        let config = DevpackConfig::load(&config_path)?;
        debug!(
            prefix = %layout.prefix().display(),
            config = %config_path.display(),
            "loaded devpack context"
        );
        Ok(Self {
            config_exists: config_path.is_file(),
            layout,
            config,
        })
    }

    pub(crate) fn catalog(&self) -> BackupCatalog {
        BackupCatalog::from_settings(&self.config.backup, self.layout.default_backup_root())
    }
}

pub(crate) fn run_rollback_list(
    ctx: &CliContext,
    package: Option<&str>,
    json: bool,
) -> Result<()> {
    let catalog = ctx.catalog();
    let renderer = TerminalRenderer::current();

    match package {
        Some(package) => {
            let records = catalog.list_backups(package)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            renderer.print_section(&format!("Backups of {package}"));
            renderer.print_lines(&format_backup_list_lines(
                package,
                &records,
                renderer.style(),
            ));
        }
        None => {
            let grouped = catalog.list_all_backups()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&grouped)?);
                return Ok(());
            }
            renderer.print_section("Backups");
            renderer.print_lines(&format_all_backups_lines(
                catalog.backup_root(),
                &grouped,
                renderer.style(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn run_rollback_restore(
    ctx: &CliContext,
    package: &str,
    timestamp: Option<&str>,
) -> Result<()> {
    if let Some(timestamp) = timestamp {
        validate_timestamp_input(timestamp)?;
    }

    let catalog = ctx.catalog();
    let renderer = TerminalRenderer::current();
    let target = ctx.layout.package_dir(package);

    let spinner = renderer.start_spinner(&format!("restoring {package}"));
    let restored = match timestamp {
        Some(timestamp) => {
            catalog.restore(package, timestamp, &target)?;
            timestamp.to_string()
        }
        None => catalog.restore_latest(package, &target)?.timestamp_str,
    };
    drop(spinner);

    renderer.print_status(
        "ok",
        &format!(
            "restored {package} from backup {restored} into {}",
            target.display()
        ),
    );
    Ok(())
}

pub(crate) fn run_clean_backups(ctx: &CliContext, args: &CleanBackupsArgs) -> Result<()> {
    let stdin = io::stdin();
    run_clean_backups_with_io(
        ctx,
        args,
        TerminalRenderer::current(),
        &mut stdin.lock(),
        &mut io::stdout(),
    )
}

pub(crate) fn run_clean_backups_with_io(
    ctx: &CliContext,
    args: &CleanBackupsArgs,
    renderer: TerminalRenderer,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<()> {
    if args.json && !args.dry_run && !args.force {
        return Err(anyhow!("--json requires --dry-run or --force"));
    }

    let catalog = ctx.catalog();
    let planner = CleanupPlanner::new(&catalog);
    let preview = planner.preview_cleanup(&cleanup_request(args))?;

    if args.json {
        let rendered = if args.dry_run {
            serde_json::to_string_pretty(&preview)?
        } else {
            serde_json::to_string_pretty(&planner.execute_preview(preview))?
        };
        writeln!(output, "{rendered}")?;
        return Ok(());
    }

    let mut lines = renderer.section_lines("Backup cleanup");
    lines.extend(format_cleanup_preview_lines(&preview, renderer.style()));
    for line in lines {
        writeln!(output, "{line}")?;
    }
    if preview.is_empty() || args.dry_run {
        return Ok(());
    }

    if !args.force && !confirm_cleanup(preview.items.len(), input, output)? {
        writeln!(
            output,
            "{}",
            render_status_line(renderer.style(), "step", "cleanup cancelled")
        )?;
        return Ok(());
    }

    let report = planner.execute_preview(preview);
    for line in format_cleanup_report_lines(&report, renderer.style()) {
        writeln!(output, "{line}")?;
    }
    if report.failed_count() > 0 {
        return Err(anyhow!(
            "{} backup(s) could not be deleted",
            report.failed_count()
        ));
    }
    Ok(())
}

pub(crate) fn run_backup_create(ctx: &CliContext, package: &str, verify: bool) -> Result<()> {
    let renderer = TerminalRenderer::current();
    if !ctx.config.backup.enabled {
        renderer.print_status(
            "warn",
            &format!(
                "backups are disabled in {}; skipping {package}",
                ctx.layout.config_path().display()
            ),
        );
        return Ok(());
    }

    let install_dir = ctx.layout.package_dir(package);
    let catalog = ctx.catalog();
    let engine = SnapshotEngine::new().with_backup_root(catalog.backup_root());

    let spinner = renderer.start_spinner(&format!("backing up {package}"));
    let outcome = engine.backup(&install_dir)?;
    drop(spinner);

    let backup_path = successful_backup_path(&outcome)?;
    renderer.print_lines(&format_backup_outcome_lines(&outcome, renderer.style()));

    if verify {
        let verified = engine.verify_contents(&install_dir, &backup_path)?;
        renderer.print_status(
            "ok",
            &format!(
                "verified {verified} file(s) against {}",
                backup_path.display()
            ),
        );
    }
    Ok(())
}

pub(crate) fn run_config_show(ctx: &CliContext) -> Result<()> {
    TerminalRenderer::current().print_lines(&format_config_lines(ctx)?);
    Ok(())
}

pub(crate) fn cleanup_request(args: &CleanBackupsArgs) -> CleanupRequest {
    CleanupRequest {
        package: args.package.clone(),
        max_age_days: args.older_than,
        keep_count: args.keep,
    }
}

pub(crate) fn validate_timestamp_input(timestamp: &str) -> Result<()> {
    if parse_backup_timestamp(timestamp).is_none() {
        return Err(anyhow!(
            "invalid backup timestamp: {timestamp} (expected {BACKUP_TIMESTAMP_FORMAT}, e.g. 20260201-093000)"
        ));
    }
    Ok(())
}

pub(crate) fn successful_backup_path(outcome: &BackupOutcome) -> Result<PathBuf> {
    match (&outcome.backup_path, &outcome.error) {
        (Some(path), None) if outcome.success => Ok(path.clone()),
        (_, Some(err)) => Err(anyhow::Error::new(err.clone()))
            .with_context(|| format!("backup of {} failed", outcome.package_name)),
        _ => Err(anyhow!("backup of {} failed", outcome.package_name)),
    }
}

pub(crate) fn confirm_cleanup(
    count: usize,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<bool> {
    write!(output, "Delete {count} backup(s)? [y/N]: ")?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(is_affirmative(&answer))
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

pub(crate) fn format_backup_list_lines(
    package: &str,
    records: &[BackupRecord],
    style: OutputStyle,
) -> Vec<String> {
    if records.is_empty() {
        return vec![render_status_line(
            style,
            "warn",
            &format!("no backups found for {package}"),
        )];
    }

    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(render_status_line(
        style,
        "step",
        &format!("{package}: {} backup(s)", records.len()),
    ));
    for (index, record) in records.iter().enumerate() {
        let latest = if index == 0 { " (latest)" } else { "" };
        lines.push(format!(
            "  {}\t{}\t{}{latest}",
            record.timestamp_str,
            HumanBytes(record.size_bytes),
            record.path.display()
        ));
    }
    lines
}

pub(crate) fn format_all_backups_lines(
    backup_root: &Path,
    grouped: &BTreeMap<String, Vec<BackupRecord>>,
    style: OutputStyle,
) -> Vec<String> {
    if grouped.is_empty() {
        return vec![render_status_line(
            style,
            "step",
            &format!("no backups found under {}", backup_root.display()),
        )];
    }

    grouped
        .iter()
        .flat_map(|(package, records)| format_backup_list_lines(package, records, style))
        .collect()
}

pub(crate) fn format_cleanup_preview_lines(
    preview: &CleanupPreview,
    style: OutputStyle,
) -> Vec<String> {
    let policy = preview.policy;
    if preview.is_empty() {
        return vec![render_status_line(
            style,
            "step",
            &format!(
                "no backups match the retention policy (max age {} days, keep {})",
                policy.max_age_days, policy.keep_count
            ),
        )];
    }

    let mut lines = preview
        .items
        .iter()
        .map(|item| {
            render_status_line(
                style,
                "warn",
                &format!(
                    "{} {} {} ({})",
                    item.package_name,
                    item.backup.timestamp_str,
                    HumanBytes(item.backup.size_bytes),
                    item.reason
                ),
            )
        })
        .collect::<Vec<_>>();
    let observed: usize = preview.totals.values().sum();
    lines.push(render_status_line(
        style,
        "step",
        &format!(
            "{} of {observed} backup(s) selected, {} reclaimable",
            preview.items.len(),
            HumanBytes(preview.reclaimable_bytes())
        ),
    ));
    lines
}

pub(crate) fn format_cleanup_report_lines(
    report: &CleanupReport,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = report
        .items
        .iter()
        .map(|item| {
            if item.delete_failed {
                render_status_line(
                    style,
                    "err",
                    &format!(
                        "failed to delete {} {}",
                        item.package_name, item.backup.timestamp_str
                    ),
                )
            } else {
                render_status_line(
                    style,
                    "ok",
                    &format!(
                        "deleted {} {} ({})",
                        item.package_name, item.backup.timestamp_str, item.reason
                    ),
                )
            }
        })
        .collect::<Vec<_>>();
    lines.push(format!(
        "cleanup summary: deleted={} failed={} reclaimed={}",
        report.deleted_count(),
        report.failed_count(),
        HumanBytes(report.reclaimed_bytes())
    ));
    lines
}

pub(crate) fn format_backup_outcome_lines(
    outcome: &BackupOutcome,
    style: OutputStyle,
) -> Vec<String> {
    let Some(path) = &outcome.backup_path else {
        return Vec::new();
    };
    vec![render_status_line(
        style,
        "ok",
        &format!(
            "backed up {} to {} ({})",
            outcome.package_name,
            path.display(),
            HumanBytes(outcome.size_bytes)
        ),
    )]
}

pub(crate) fn format_config_lines(ctx: &CliContext) -> Result<Vec<String>> {
    let config_path = ctx.layout.config_path();
    let config_state = if ctx.config_exists {
        config_path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", config_path.display())
    };

    let mut lines = vec![
        format!("prefix: {}", ctx.layout.prefix().display()),
        format!("config: {config_state}"),
        format!("backup root: {}", ctx.catalog().backup_root().display()),
        String::new(),
    ];
    lines.extend(ctx.config.to_toml_string()?.lines().map(str::to_string));
    Ok(lines)
}
