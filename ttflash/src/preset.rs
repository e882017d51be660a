//! Downloadable firmware presets.
//!
//! A preset names a set of files under one base URL, each with the absolute
//! flash address it is programmed at. Files are flashed in listed order.

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::sector::{FirmwareImage, FlashOptions};

/// One file of a preset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PresetFile {
    /// Absolute flash address.
    pub offset: u32,
    /// File name, resolved against the preset base URL.
    pub name: String,
}

impl PresetFile {
    /// Create a file entry.
    pub fn new(offset: u32, name: impl Into<String>) -> Self {
        Self {
            offset,
            name: name.into(),
        }
    }
}

/// A named, ordered set of firmware files.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwarePreset {
    /// Display name.
    pub name: String,
    /// Directory the files are fetched from.
    #[cfg_attr(feature = "serde", serde(alias = "baseUrl"))]
    pub base_url: Url,
    /// Files in programming order.
    pub files: Vec<PresetFile>,
    /// Index of the file after which the flash is switched to QSPI mode.
    #[cfg_attr(
        feature = "serde",
        serde(default, alias = "qspiAfter", skip_serializing_if = "Option::is_none")
    )]
    pub qspi_after: Option<usize>,
}

impl FirmwarePreset {
    /// Create a preset from a base URL string.
    pub fn new(name: impl Into<String>, base_url: &str, files: Vec<PresetFile>) -> Result<Self> {
        let name = name.into();
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidPreset(format!("{name}: bad base URL {base_url:?}: {e}")))?;
        let preset = Self {
            name,
            base_url,
            files,
            qspi_after: None,
        };
        preset.validate()?;
        Ok(preset)
    }

    /// Switch to QSPI mode after the file at `index`.
    pub fn with_qspi_after(mut self, index: usize) -> Result<Self> {
        self.qspi_after = Some(index);
        self.validate()?;
        Ok(self)
    }

    /// Check the preset can be flashed.
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::InvalidPreset(format!("{}: no files", self.name)));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(Error::InvalidPreset(format!(
                "{}: base URL {} cannot hold files",
                self.name, self.base_url
            )));
        }
        if let Some(file) = self.files.iter().find(|f| f.name.is_empty()) {
            return Err(Error::InvalidPreset(format!(
                "{}: file at 0x{:X} has no name",
                self.name, file.offset
            )));
        }
        if let Some(index) = self.qspi_after {
            if index >= self.files.len() {
                return Err(Error::InvalidPreset(format!(
                    "{}: qspi_after index {index} out of range ({} files)",
                    self.name,
                    self.files.len()
                )));
            }
        }
        Ok(())
    }

    /// Location of `file`.
    ///
    /// Joined like a relative link, so a base URL without a trailing `/`
    /// loses its last path segment.
    pub fn file_url(&self, file: &PresetFile) -> Result<Url> {
        self.base_url
            .join(&file.name)
            .map_err(|e| Error::InvalidPreset(format!("{}: {}: {e}", self.name, file.name)))
    }

    /// Programming options for the file at `index`.
    pub fn flash_options(&self, index: usize) -> FlashOptions {
        FlashOptions {
            enable_qspi_after: self.qspi_after == Some(index),
        }
    }

    /// Pair the file at `index` with its fetched contents.
    pub fn image(&self, index: usize, data: Vec<u8>) -> Result<FirmwareImage> {
        let file = self.files.get(index).ok_or_else(|| {
            Error::InvalidPreset(format!("{}: no file at index {index}", self.name))
        })?;
        Ok(FirmwareImage {
            name: file.name.clone(),
            offset: file.offset,
            data,
            options: self.flash_options(index),
        })
    }
}

/// Presets shipped with the tool.
pub fn builtin_presets() -> Result<Vec<FirmwarePreset>> {
    Ok(vec![
        FirmwarePreset::new(
            "KianV uLinux Image (TT06)",
            "https://urish.github.io/tt-kian-riscv-firmware/",
            vec![
                PresetFile::new(0x10_0000, "bootloader.bin"),
                PresetFile::new(0x18_0000, "kianv.dtb"),
                PresetFile::new(0x20_0000, "Image"),
            ],
        )?,
        FirmwarePreset::new(
            "Run Length Encoded Bad Apple Video (TT07)",
            "http://lion.rddev.co.uk/",
            vec![PresetFile::new(0, "tt07-badapple640x480.bin")],
        )?,
    ])
}
