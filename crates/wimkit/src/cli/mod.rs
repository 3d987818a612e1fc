//! CLI command definitions and handlers.

mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tabled::{Table, Tabled};
use wimkit_common::ImageGuid;

use crate::config::WimkitConfig;
use crate::imaging::{
    ExportRequest, LogLevel, NativeImageService, SystemDism, SystemWim, WimExportEngine,
};
use crate::mount::{MountRegistry, MountRequest, MountStatus, MountedWindowsImage};

pub use progress::ProgressBarSink;

/// Wimkit - Windows image mount and export toolkit
#[derive(Parser)]
#[command(name = "wimkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for wimkit data
    #[arg(long, global = true, env = "WIMKIT_ROOT")]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table.
    Table,
    /// Pretty-printed JSON.
    Json,
}

/// Wimkit commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Mount an image from a container
    Mount {
        /// Path to the image container
        image: PathBuf,

        /// 1-based image index
        #[arg(short, long, default_value_t = 1)]
        index: u32,

        /// Mount directory (default: allocated under the data root)
        #[arg(short, long)]
        mount_dir: Option<PathBuf>,

        /// Image GUID used to name the allocated directory
        #[arg(long, conflicts_with = "mount_dir")]
        guid: Option<ImageGuid>,

        /// Mount without write access
        #[arg(long)]
        read_only: bool,
    },

    /// Unmount a mounted image
    Unmount {
        /// Mount directory
        mount_dir: PathBuf,

        /// Write modifications back to the container (default: discard)
        #[arg(long)]
        commit: bool,
    },

    /// List tracked mounts
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Only display mount IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Export an image into another (or the same) container
    Export {
        /// Source container
        source: PathBuf,

        /// Destination container, created if missing
        destination: PathBuf,

        /// 1-based source image index
        #[arg(short, long, default_value_t = 1)]
        index: u32,

        /// Compression: none, fast, maximum or recovery
        #[arg(short, long, default_value = "maximum")]
        compression: String,

        /// Verify integrity while exporting
        #[arg(long)]
        check_integrity: bool,

        /// Temporary directory for the export
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Remove stale, empty mount directories
    Cleanup {
        /// Minimum age in hours (default: from configuration)
        #[arg(long)]
        older_than_hours: Option<u64>,

        /// Also ask the native subsystem to repair orphaned mount points
        #[arg(long)]
        native: bool,
    },

    /// Show paths and configuration
    Info {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Tabled)]
struct MountRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "INDEX")]
    index: u32,
    #[tabled(rename = "MODE")]
    mode: &'static str,
    #[tabled(rename = "STATUS")]
    status: MountStatus,
    #[tabled(rename = "PATH")]
    path: String,
}

impl From<&MountedWindowsImage> for MountRow {
    fn from(record: &MountedWindowsImage) -> Self {
        Self {
            id: record.mount_id().short(),
            image: record.source_image_path().display().to_string(),
            index: record.image_index(),
            mode: if record.is_read_only() { "ro" } else { "rw" },
            status: record.status(),
            path: record.mount_path().display().to_string(),
        }
    }
}

#[derive(Tabled, serde::Serialize)]
struct SettingRow {
    #[tabled(rename = "SETTING")]
    setting: &'static str,
    #[tabled(rename = "VALUE")]
    value: String,
}

impl Cli {
    /// Build the configuration selected by the global flags.
    #[must_use]
    pub fn config(&self) -> WimkitConfig {
        let mut config = WimkitConfig::default();
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if self.debug {
            config = config.with_log_level(LogLevel::ErrorsWarningsInfo);
        }
        config
    }

    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Mount {
                image,
                index,
                mount_dir,
                guid,
                read_only,
            } => {
                config.paths.create_dirs()?;
                let mut registry = MountRegistry::with_store(config.state_store())?;
                let mount_path = match mount_dir {
                    Some(dir) => dir,
                    None => config.allocator().allocate(index, guid)?,
                };

                let mut service = NativeImageService::new(SystemDism::new()?, config.service_options());
                service.initialize()?;

                let bar = ProgressBarSink::new("Mounting image");
                let request = MountRequest {
                    image_path: image,
                    index,
                    mount_path,
                    read_only,
                };
                let record = registry
                    .mount(&service, &request, Some(&bar))
                    .inspect_err(|_| bar.abandon())
                    .wrap_err("Failed to mount image")?;
                bar.finish("Mounted");

                println!(
                    "Mounted {} index {} at {} ({})",
                    record.source_image_path().display(),
                    record.image_index(),
                    record.mount_path().display(),
                    record.mount_id()
                );
                Ok(())
            }

            Commands::Unmount { mount_dir, commit } => {
                let mut registry = MountRegistry::with_store(config.state_store())?;
                let mut record = registry
                    .find_by_path(&mount_dir)
                    .cloned()
                    .ok_or_else(|| eyre!("No tracked mount at {}", mount_dir.display()))?;

                let mut service = NativeImageService::new(SystemDism::new()?, config.service_options());
                service.initialize()?;

                let bar = ProgressBarSink::new("Unmounting image");
                let outcome = registry
                    .unmount(&service, &mut record, commit, Some(&bar))
                    .inspect_err(|_| bar.abandon())
                    .wrap_err("Failed to unmount image")?;
                bar.finish("Unmounted");

                println!(
                    "Unmounted {} ({})",
                    record.mount_path().display(),
                    MountStatus::from(outcome)
                );
                Ok(())
            }

            Commands::List { format, quiet } => {
                let registry = MountRegistry::with_store(config.state_store())?;
                let mut records: Vec<&MountedWindowsImage> = registry.active().collect();
                records.sort_by_key(|r| r.mounted_at());

                if quiet {
                    for record in records {
                        println!("{}", record.mount_id());
                    }
                } else if format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else if records.is_empty() {
                    println!("No tracked mounts");
                } else {
                    let rows: Vec<MountRow> = records.into_iter().map(MountRow::from).collect();
                    println!("{}", Table::new(rows));
                }
                Ok(())
            }

            Commands::Export {
                source,
                destination,
                index,
                compression,
                check_integrity,
                scratch_dir,
            } => {
                let request = ExportRequest::new(source, destination, index, &compression)?
                    .with_integrity_check(check_integrity)
                    .with_scratch_dir(scratch_dir.unwrap_or_else(|| config.scratch_dir()));
                let engine = WimExportEngine::new(SystemWim::new()?);

                let bar = ProgressBarSink::new("Exporting image");
                engine
                    .export(&request, Some(&bar))
                    .inspect_err(|_| bar.abandon())
                    .wrap_err("Failed to export image")?;
                bar.finish("Exported");

                println!(
                    "Exported index {} to {} ({})",
                    request.source_index,
                    request.destination.display(),
                    request.compression
                );
                Ok(())
            }

            Commands::Cleanup {
                older_than_hours,
                native,
            } => {
                let hours = older_than_hours.unwrap_or(config.stale_mount_hours);
                let report = config.allocator().cleanup(hours);
                for path in &report.removed {
                    println!("Removed {}", path.display());
                }
                for path in &report.failed {
                    eprintln!("Failed to remove {}", path.display());
                }
                println!(
                    "{} removed, {} still populated, {} failed",
                    report.removed.len(),
                    report.retained.len(),
                    report.failed.len()
                );

                if native {
                    let mut service =
                        NativeImageService::new(SystemDism::new()?, config.service_options());
                    service.initialize()?;
                    service.cleanup_mountpoints()?;
                    println!("Native mount points cleaned up");
                }
                Ok(())
            }

            Commands::Info { format } => {
                let rows = info_rows(&config);
                if format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    println!("{}", Table::new(rows));
                }
                Ok(())
            }
        }
    }
}

fn info_rows(config: &WimkitConfig) -> Vec<SettingRow> {
    let row = |setting, value: String| SettingRow { setting, value };
    vec![
        row("root", config.paths.root.display().to_string()),
        row("mounts", config.paths.mounts().display().to_string()),
        row("state", config.paths.state().display().to_string()),
        row("scratch", config.scratch_dir().display().to_string()),
        row("native_log", config.paths.native_log().display().to_string()),
        row("stale_mount_hours", config.stale_mount_hours.to_string()),
        row("log_level", format!("{:?}", config.log_level)),
        row("version", env!("CARGO_PKG_VERSION").to_string()),
    ]
}
