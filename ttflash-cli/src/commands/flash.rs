//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::fs;
use std::path::Path;
use ttflash::{FirmwareImage, FlashOptions, Port, TtBoardDevice, format_kb};

use crate::board::{load_scripts, with_board};
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

fn bar_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .context("Invalid progress template")?
        .progress_chars("#>-"))
}

/// One progress bar per file, following the library's progress callback.
struct FileBars<'a> {
    quiet: bool,
    images: &'a [FirmwareImage],
    /// `None` when bars are hidden.
    style: Option<ProgressStyle>,
    current: Option<(usize, ProgressBar)>,
    next: usize,
}

impl<'a> FileBars<'a> {
    fn new(cli: &Cli, images: &'a [FirmwareImage]) -> Result<Self> {
        let style = if cli.quiet || !use_fancy_output() {
            None
        } else {
            Some(bar_style()?)
        };
        Ok(Self {
            quiet: cli.quiet,
            images,
            style,
            current: None,
            next: 0,
        })
    }

    fn current_name(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|(index, _)| self.images[*index].name.as_str())
    }

    fn start(&mut self, index: usize) {
        let image = &self.images[index];
        if !self.quiet {
            eprintln!(
                "{} [{}/{}] {} ({} KB) -> 0x{:X}",
                style("⚡").cyan(),
                index + 1,
                self.images.len(),
                style(&image.name).bold(),
                format_kb(image.data.len()),
                image.offset
            );
        }
        let pb = match &self.style {
            Some(bar_style) => {
                let pb = ProgressBar::new(image.data.len() as u64);
                pb.set_style(bar_style.clone());
                pb
            },
            None => ProgressBar::hidden(),
        };
        pb.set_message(image.name.clone());
        self.current = Some((index, pb));
        self.next = index + 1;
    }

    fn update(&mut self, name: &str, written: usize, total: usize) {
        if self.current_name() != Some(name) {
            self.finish_current();
            let found = self.images[self.next..]
                .iter()
                .position(|image| image.name == name);
            match found {
                Some(offset) => self.start(self.next + offset),
                None => return,
            }
        }
        if let Some((_, pb)) = &self.current {
            pb.set_length(total as u64);
            pb.set_position(written as u64);
        }
    }

    fn finish_current(&mut self) {
        if let Some((index, pb)) = self.current.take() {
            pb.finish_and_clear();
            if !self.quiet {
                eprintln!("{} {} flashed", style("✓").green(), self.images[index].name);
            }
        }
    }

    fn abandon_current(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.abandon();
        }
    }
}

/// Flash `images` in order, with one progress bar per file.
///
/// Stops at the first failure; Ctrl-C surfaces as [`CliError::Cancelled`].
pub(crate) fn flash_images<P: Port>(
    cli: &Cli,
    board: &TtBoardDevice<P>,
    images: &[FirmwareImage],
) -> Result<()> {
    let mut bars = FileBars::new(cli, images)?;
    let result = board.program_images(images, |name, written, total| {
        bars.update(name, written, total);
    });

    match result {
        Ok(()) => {
            bars.finish_current();
            Ok(())
        },
        Err(e) => {
            bars.abandon_current();
            let name = e.failed_file().unwrap_or("image").to_string();
            if matches!(e.innermost(), ttflash::Error::Interrupted) {
                return Err(CliError::Cancelled(format!("Interrupted while flashing {name}")).into());
            }
            if !cli.quiet {
                eprintln!("{} {name} failed", style("✗").red());
            }
            Err(e.into())
        },
    }
}

/// Build an image for a local file.
fn load_image(file: &Path, offset: u32) -> Result<FirmwareImage> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
    debug!("Loaded {name}: {} bytes", data.len());
    Ok(FirmwareImage {
        name,
        offset,
        data,
        options: FlashOptions::default(),
    })
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, file: &Path, offset: u32) -> Result<()> {
    let image = load_image(file, offset)?;
    let scripts = load_scripts(cli, config, true)?;

    with_board(cli, config, &scripts, |board| {
        flash_images(cli, board, std::slice::from_ref(&image))
    })?;

    if !cli.quiet {
        eprintln!(
            "{} Flashed {} KB at 0x{offset:X}",
            style("🎉").green(),
            format_kb(image.data.len())
        );
    }
    Ok(())
}
