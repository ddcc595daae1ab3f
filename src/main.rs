use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use voxrelay::app::{RunOptions, run};
use voxrelay::audio::capture::list_devices;
use voxrelay::cli::{Cli, Commands, ModelsAction};
use voxrelay::config::Config;
use voxrelay::models::{download_model, is_model_installed, list_models};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    voxrelay::logging::init(cli.verbose, cli.quiet);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            let options = RunOptions {
                source_language: cli.source_language,
                target_language: cli.target_language,
                model: cli.model,
                device: cli.device,
                use_gpu: cli.compute.map(|mode| mode.use_gpu()),
                duration: cli.duration,
                input: cli.input,
                json: cli.json,
                no_download: cli.no_download,
                quiet: cli.quiet,
            };

            let outcome = run(config, options).await?;
            if let Some(fatal) = &outcome.fatal {
                eprintln!("{} {fatal}", "error:".red());
                std::process::exit(1);
            }
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Models { action }) => {
            handle_models_command(action, cli.quiet).await?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "voxrelay", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxrelay/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of any of these.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        if device.recommended {
            println!("  [{idx}] {} {}", device.name, "(recommended)".green());
        } else {
            println!("  [{idx}] {}", device.name);
        }
    }

    Ok(())
}

/// Handle model management commands.
async fn handle_models_command(action: ModelsAction, quiet: bool) -> Result<()> {
    match action {
        ModelsAction::List => {
            println!("Available models:");
            for model in list_models() {
                let installed = if is_model_installed(model.name) {
                    "installed".green().to_string()
                } else {
                    "not installed".dimmed().to_string()
                };
                println!("  {:<8} {:>5} MB  {installed}", model.name, model.size_mb);
            }
        }
        ModelsAction::Install { name } => {
            let path = download_model(&name, !quiet).await?;
            println!("Model '{name}' installed successfully");
            println!("Location: {}", path.display());
        }
    }
    Ok(())
}
