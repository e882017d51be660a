//! Preset listing and flashing.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use ttflash::{FirmwareImage, FirmwarePreset, builtin_presets, format_kb};

use super::flash::flash_images;
use crate::board::{load_scripts, with_board};
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Built-in presets followed by the ones from the config files.
fn all_presets(config: &Config) -> Result<Vec<FirmwarePreset>> {
    let mut presets = builtin_presets()?;
    presets.extend(config.presets.iter().cloned());
    Ok(presets)
}

/// Pick a preset by 1-based number, exact name, or unique name fragment.
fn select_preset<'a>(presets: &'a [FirmwarePreset], selector: &str) -> Result<&'a FirmwarePreset> {
    let selector = selector.trim();
    if let Ok(number) = selector.parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|i| presets.get(i))
            .ok_or_else(|| {
                CliError::Usage(format!(
                    "No preset number {number}; choose 1 to {}",
                    presets.len()
                ))
                .into()
            });
    }

    let needle = selector.to_lowercase();
    if let Some(preset) = presets
        .iter()
        .find(|p| p.name.to_lowercase() == needle)
    {
        return Ok(preset);
    }

    let matches: Vec<&FirmwarePreset> = presets
        .iter()
        .filter(|p| {
            p.name
                .to_lowercase()
                .contains(&needle)
        })
        .collect();
    match matches.as_slice() {
        [preset] => Ok(preset),
        [] => Err(CliError::Usage(format!(
            "No preset matches '{selector}'. Run `ttflash presets` to list them"
        ))
        .into()),
        _ => Err(CliError::Usage(format!(
            "'{selector}' matches {} presets; be more specific",
            matches.len()
        ))
        .into()),
    }
}

fn describe(index: usize, preset: &FirmwarePreset) -> String {
    let mut out = format!("{:>2}. {}\n    {}", index + 1, preset.name, preset.base_url);
    for (i, file) in preset.files.iter().enumerate() {
        out.push_str(&format!("\n      0x{:08X}  {}", file.offset, file.name));
        if preset.qspi_after == Some(i) {
            out.push_str("  (QSPI after)");
        }
    }
    out
}

/// List presets.
pub(crate) fn cmd_presets(config: &Config, json: bool) -> Result<()> {
    let presets = all_presets(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }
    for (i, preset) in presets.iter().enumerate() {
        println!("{}", describe(i, preset));
    }
    Ok(())
}

fn download_spinner(cli: &Cli) -> Result<ProgressBar> {
    if cli.quiet || !use_fancy_output() {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .context("Invalid progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Fetch every file of `preset` before touching the board.
fn download(cli: &Cli, preset: &FirmwarePreset) -> Result<Vec<FirmwareImage>> {
    let fetcher = Fetcher::new()?;
    let mut images = Vec::with_capacity(preset.files.len());

    for (index, file) in preset.files.iter().enumerate() {
        if was_interrupted() {
            return Err(CliError::Cancelled("Interrupted while downloading".to_string()).into());
        }
        let url = preset.file_url(file)?;
        let pb = download_spinner(cli)?;
        pb.set_message(format!("Downloading {}", file.name));

        let data = match fetcher.fetch(&url) {
            Ok(data) => data,
            Err(e) => {
                pb.abandon();
                return Err(e);
            },
        };
        pb.finish_and_clear();
        if !cli.quiet {
            eprintln!(
                "{} Downloaded {} ({} KB)",
                style("↓").cyan(),
                file.name,
                format_kb(data.len())
            );
        }
        images.push(preset.image(index, data)?);
    }
    Ok(images)
}

/// Download and flash a preset.
pub(crate) fn cmd_preset(cli: &Cli, config: &Config, selector: &str) -> Result<()> {
    let presets = all_presets(config)?;
    let preset = select_preset(&presets, selector)?;
    let scripts = load_scripts(cli, config, true)?;

    if !cli.quiet {
        eprintln!("{} {}", style("📦").cyan(), style(&preset.name).bold());
    }
    let images = download(cli, preset)?;

    with_board(cli, config, &scripts, |board| flash_images(cli, board, &images))?;

    if !cli.quiet {
        eprintln!(
            "{} {} flashed ({} files)",
            style("🎉").green(),
            preset.name,
            images.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttflash::PresetFile;

    fn presets() -> Vec<FirmwarePreset> {
        let mut presets = builtin_presets().unwrap();
        presets.push(
            FirmwarePreset::new(
                "KianV debug build",
                "file:///tmp/fw/",
                vec![PresetFile::new(0, "a.bin")],
            )
            .unwrap(),
        );
        presets
    }

    fn usage(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_)))
    }

    #[test]
    fn test_select_by_number() {
        let presets = presets();
        assert_eq!(
            select_preset(&presets, "2").unwrap().name,
            "Run Length Encoded Bad Apple Video (TT07)"
        );
        assert!(usage(&select_preset(&presets, "0").unwrap_err()));
        assert!(usage(&select_preset(&presets, "4").unwrap_err()));
    }

    #[test]
    fn test_select_by_name() {
        let presets = presets();
        assert_eq!(
            select_preset(&presets, "kianv debug build").unwrap().name,
            "KianV debug build"
        );
        assert_eq!(
            select_preset(&presets, "bad apple").unwrap().name,
            "Run Length Encoded Bad Apple Video (TT07)"
        );
    }

    #[test]
    fn test_ambiguous_or_unknown_selector() {
        let presets = presets();
        assert!(usage(&select_preset(&presets, "kianv").unwrap_err()));
        assert!(usage(&select_preset(&presets, "doom").unwrap_err()));
    }

    #[test]
    fn test_config_presets_follow_builtins() {
        let mut config = Config::default();
        config.presets = presets().split_off(2);
        let all = all_presets(&config).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].name, "KianV debug build");
    }

    #[test]
    fn test_describe_lists_offsets() {
        let presets = presets();
        let text = describe(0, &presets[0]);
        assert!(text.starts_with(" 1. KianV uLinux Image (TT06)"));
        assert!(text.contains("0x00100000  bootloader.bin"));
        assert!(text.contains("0x00200000  Image"));
    }

    #[test]
    fn test_download_reads_local_preset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), [7u8; 10]).unwrap();
        std::fs::write(dir.path().join("b.bin"), [8u8; 20]).unwrap();
        let base = url::Url::from_directory_path(dir.path()).unwrap();
        let preset = FirmwarePreset::new(
            "Local",
            base.as_str(),
            vec![PresetFile::new(0, "a.bin"), PresetFile::new(0x1000, "b.bin")],
        )
        .unwrap()
        .with_qspi_after(1)
        .unwrap();

        let cli = <Cli as clap::Parser>::try_parse_from(["ttflash", "-q", "presets"]).unwrap();
        let images = download(&cli, &preset).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].offset, 0x1000);
        assert_eq!(images[1].data, vec![8u8; 20]);
        assert!(images[1].options.enable_qspi_after);
        assert!(!images[0].options.enable_qspi_after);
    }
}
