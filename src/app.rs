//! 命令行前端

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::core::config::DeployConfig;
use crate::core::error::DeployError;
use crate::core::firmware::FirmwareType;
use crate::core::host::{require_admin, Host, WindowsHost};
use crate::core::image::{get_image_info, locate_install_image, print_image_info};
use crate::core::installer::InstallerManager;
use crate::core::parameters::{DriveLetter, Parameters};

#[derive(Parser, Debug)]
#[command(name = "wcit", version, about = "Windows CLI Installer Tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Format a disk, deploy Windows to it and install the bootloader
    Install(InstallArgs),
    /// List the physical disks of this machine
    Disks,
    /// List the editions inside an image file or the install image of a drive
    Images {
        /// Image file path or source drive (e.g. 'D:')
        target: String,
    },
    /// Show the firmware type and whether the process is elevated
    Firmware,
    /// Show the effective configuration
    Config {
        /// Write the effective configuration to config.json
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct InstallArgs {
    /// Drive letter that receives Windows (e.g. 'Z:')
    #[arg(long, value_name = "DRIVE")]
    pub destination: Option<DriveLetter>,
    /// Drive letter assigned to the boot partition (e.g. 'Y:')
    #[arg(long, value_name = "DRIVE")]
    pub efi: Option<DriveLetter>,
    /// Number of the disk to wipe (see `wcit disks`)
    #[arg(long, value_name = "N")]
    pub disk: Option<u32>,
    /// Drive holding the Windows installation media (e.g. 'D:')
    #[arg(long, value_name = "DRIVE")]
    pub source: Option<DriveLetter>,
    /// Image file to apply, overrides the one found on --source
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,
    /// Edition index inside the image (see `wcit images`)
    #[arg(long, value_name = "N")]
    pub index: Option<u32>,
    /// UEFI or BIOS, detected when omitted
    #[arg(long, value_name = "TYPE")]
    pub firmware: Option<FirmwareType>,
    /// Directory with additional drivers to inject (searched recursively)
    #[arg(long, value_name = "DIR")]
    pub drivers: Option<PathBuf>,
    /// Run the external tools on a background worker thread
    #[arg(long)]
    pub threaded: bool,
    /// Do not ask for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl From<&InstallArgs> for Parameters {
    fn from(args: &InstallArgs) -> Self {
        Parameters {
            destination_drive: args.destination,
            efi_drive: args.efi,
            disk_number: args.disk,
            source_drive: args.source,
            image_file_path: args.image.clone(),
            image_index: args.index,
            firmware_type: args.firmware,
            additional_drivers: args.drivers.clone(),
            multithreaded: args.threaded,
        }
    }
}

/// 欢迎信息
pub fn banner() -> String {
    format!(
        "Welcome to {} v{} (Windows CLI Installer Tool), by {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS")
    )
}

pub fn run(cli: Cli, config: DeployConfig) -> Result<()> {
    println!("{}", banner());
    println!();

    let host = WindowsHost;
    match cli.command {
        None => install(host, config, &InstallArgs::default()),
        Some(Command::Install(args)) => install(host, config, &args),
        Some(Command::Disks) => list_disks(&host),
        Some(Command::Images { target }) => list_images(&host, &target),
        Some(Command::Firmware) => {
            println!("Firmware type: {}", host.firmware_type());
            println!(
                "Administrator: {}",
                if host.is_admin() { "yes" } else { "no" }
            );
            Ok(())
        }
        Some(Command::Config { save }) => show_config(&config, save),
    }
}

fn install<H: Host>(host: H, config: DeployConfig, args: &InstallArgs) -> Result<()> {
    if cfg!(not(windows)) {
        return Err(DeployError::Unsupported.into());
    }
    require_admin(&host, "install Windows")?;

    let params = Parameters::from(args);
    let skip_confirmation = args.yes;
    let manager = InstallerManager::new(host, config);

    let deployed = manager.run(params, |params| {
        println!("{}", params.summary());
        println!();
        if skip_confirmation {
            return Ok(true);
        }
        confirm("All data on the selected disk will be erased. Is this correct? [y/N] ")
    })?;

    if deployed {
        println!();
        println!("Windows has been deployed successfully.");
    } else {
        println!("Nothing was changed.");
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("读取确认输入失败")?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn list_disks<H: Host>(host: &H) -> Result<()> {
    let disks = host.list_disks()?;
    if disks.is_empty() {
        println!("No disks were found.");
        return Ok(());
    }
    for disk in &disks {
        println!("{}", disk);
    }
    Ok(())
}

fn list_images<H: Host>(host: &H, target: &str) -> Result<()> {
    let image = match DriveLetter::parse(target) {
        Ok(drive) => locate_install_image(&host.volume_root(drive))?,
        Err(_) => PathBuf::from(target),
    };

    let images = get_image_info(host, &image)?;
    print_image_info(&image, &images);
    Ok(())
}

fn show_config(config: &DeployConfig, save: bool) -> Result<()> {
    let path = DeployConfig::get_config_path();
    println!("Configuration file: {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);

    if save {
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}
