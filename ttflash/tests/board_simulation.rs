//! End-to-end tests against a simulated board shell.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ttflash::{
    DeviceConfig, Error, FirmwarePreset, HandshakeConfig, MemoryTarget, PresetFile,
    SessionPhase, ShellScripts, TtBoardDevice, memory_pair,
};

/// What the simulated board did, returned when the host hangs up.
#[derive(Debug, Default)]
struct BoardRecord {
    /// Program commands in arrival order.
    commands: Vec<String>,
    /// `(address, bytes)` per programmed sector.
    sectors: Vec<(u32, Vec<u8>)>,
}

impl BoardRecord {
    fn flash_at(&self, offset: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0xFF; len];
        for (address, data) in &self.sectors {
            let start = (address - offset) as usize;
            out[start..start + data.len()].copy_from_slice(data);
        }
        out
    }
}

enum Receive {
    Shell,
    Header { address: u32 },
    Data { address: u32, len: usize },
}

struct BoardOptions {
    version: Option<&'static str>,
    flash_id: &'static str,
    /// Hang up instead of acknowledging this sector (counted over the session).
    hang_up_at_sector: Option<usize>,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            version: Some("release_v2.0.1"),
            flash_id: "ef4018",
            hang_up_at_sector: None,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn spawn_board(target: MemoryTarget, options: BoardOptions) -> JoinHandle<BoardRecord> {
    thread::spawn(move || {
        let mut record = BoardRecord::default();
        let mut buf: Vec<u8> = Vec::new();
        let mut state = Receive::Shell;
        let mut answered_version = false;

        while let Some(bytes) = target.recv_timeout(Duration::from_millis(5)) {
            buf.extend_from_slice(&bytes);
            loop {
                match state {
                    Receive::Shell => {
                        if !answered_version && find(&buf, b"sdk_version").is_some() {
                            answered_version = true;
                            if let Some(version) = options.version {
                                target.send_line("MicroPython v1.22 on RP2040");
                                target.send_line(&format!("tt.sdk_version={version}"));
                            }
                        }
                        let Some(start) = find(&buf, b"flash.program_sectors(") else {
                            break;
                        };
                        let Some(eot) = buf[start..].iter().position(|&b| b == 0x04) else {
                            break;
                        };
                        let command =
                            String::from_utf8_lossy(&buf[start..start + eot]).into_owned();
                        buf.drain(..=start + eot);

                        let hex = command
                            .trim_start_matches("flash.program_sectors(0x")
                            .split([',', ')'])
                            .next()
                            .unwrap();
                        let address = u32::from_str_radix(hex, 16).unwrap();
                        record.commands.push(command);
                        target.send_line(&format!("tt.flash_id={}", options.flash_id));
                        target.send(format!("\x04>OKflash_prog={address:x}\r\n").as_bytes());
                        state = Receive::Header { address };
                    },
                    Receive::Header { address } => {
                        let Some(end) = find(&buf, b"\r\n") else {
                            break;
                        };
                        let len: usize = String::from_utf8_lossy(&buf[..end]).parse().unwrap();
                        buf.drain(..end + 2);
                        if len == 0 {
                            target.send_line("flash_prog=ok");
                            state = Receive::Shell;
                        } else {
                            state = Receive::Data { address, len };
                        }
                    },
                    Receive::Data { address, len } => {
                        if buf.len() < len {
                            break;
                        }
                        let data: Vec<u8> = buf.drain(..len).collect();
                        record.sectors.push((address, data));
                        if options.hang_up_at_sector == Some(record.sectors.len()) {
                            target.hang_up();
                            return record;
                        }
                        let next = address + len as u32;
                        target.send_line(&format!("flash_prog={next:x}"));
                        state = Receive::Header { address: next };
                    },
                }
            }
        }
        record
    })
}

/// Route engine logs through the test harness (`RUST_LOG=debug` to see them).
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> DeviceConfig {
    DeviceConfig::default().with_handshake(HandshakeConfig {
        version_wait: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        boot_poll_attempts: 10,
    })
}

fn scripts() -> ShellScripts {
    ShellScripts::new("import ttboard\n", "import flash\n")
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_handshake_then_flash_one_image() {
    init_logging();
    let (port, target) = memory_pair("sim");
    let board = spawn_board(target, BoardOptions::default());
    let device = TtBoardDevice::open(port, config()).unwrap();

    device.start(&scripts()).unwrap();
    assert_eq!(device.phase(), SessionPhase::RawReplActive);
    assert_eq!(device.session().shell_version.as_deref(), Some("2.0.1"));

    let payload = pattern(10_000, 7);
    let mut progress = Vec::new();
    device
        .program_flash(0x10_0000, &payload, |written, total| {
            assert_eq!(total, payload.len());
            progress.push(written);
        })
        .unwrap();
    assert_eq!(progress, vec![0, 4096, 8192, 10_000, 10_000]);
    assert_eq!(device.session().flash_id.as_deref(), Some("ef4018"));

    let log = device.session().log;
    assert!(
        log.iter()
            .any(|e| e.sent && e.text == "flash.program_sectors(0x100000)")
    );
    assert!(log.iter().any(|e| !e.sent && e.text == "flash_prog=100000"));

    device.close().unwrap();
    let record = board.join().unwrap();
    assert_eq!(record.commands, vec!["flash.program_sectors(0x100000)"]);
    let sizes: Vec<usize> = record.sectors.iter().map(|(_, d)| d.len()).collect();
    assert_eq!(sizes, vec![4096, 4096, 1808]);
    assert_eq!(record.flash_at(0x10_0000, payload.len()), payload);
}

#[test]
fn test_preset_files_flash_in_order() {
    init_logging();
    let (port, target) = memory_pair("sim");
    let board = spawn_board(target, BoardOptions::default());
    let device = TtBoardDevice::open(port, config()).unwrap();
    device.start(&scripts()).unwrap();

    let preset = FirmwarePreset::new(
        "demo",
        "file:///tmp/demo/",
        vec![
            PresetFile::new(0x10_0000, "bootloader.bin"),
            PresetFile::new(0x18_0000, "kianv.dtb"),
        ],
    )
    .unwrap()
    .with_qspi_after(1)
    .unwrap();
    let images = vec![
        preset.image(0, pattern(5000, 1)).unwrap(),
        preset.image(1, pattern(300, 2)).unwrap(),
    ];

    let done = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&done);
    device
        .program_images(&images, move |name, written, total| {
            if written == total {
                sink.lock().unwrap().push(name.to_string());
            }
        })
        .unwrap();
    assert_eq!(
        *done.lock().unwrap(),
        vec!["bootloader.bin", "bootloader.bin", "kianv.dtb", "kianv.dtb"]
    );

    device.close().unwrap();
    let record = board.join().unwrap();
    assert_eq!(
        record.commands,
        vec![
            "flash.program_sectors(0x100000)",
            "flash.program_sectors(0x180000, enQSPIAfter=True)",
        ]
    );
    assert_eq!(record.flash_at(0x18_0000, 300), images[1].data);
}

#[test]
fn test_disconnect_mid_transfer_names_the_file() {
    init_logging();
    let (port, target) = memory_pair("sim");
    let board = spawn_board(
        target,
        BoardOptions {
            hang_up_at_sector: Some(2),
            ..BoardOptions::default()
        },
    );
    let device = TtBoardDevice::open(port, config()).unwrap();
    device.start(&scripts()).unwrap();

    let preset = FirmwarePreset::new(
        "demo",
        "https://example.com/fw/",
        vec![PresetFile::new(0, "video.bin")],
    )
    .unwrap();
    let images = vec![preset.image(0, pattern(3 * 4096, 3)).unwrap()];

    let err = device.program_images(&images, |_, _, _| {}).unwrap_err();
    assert_eq!(err.failed_file(), Some("video.bin"));
    assert!(matches!(
        err,
        Error::FileFailed { ref source, .. } if matches!(**source, Error::Closed)
    ));
    assert!(device.is_closed());

    // Closing after the transport went away still succeeds.
    device.close().unwrap();
    let record = board.join().unwrap();
    assert_eq!(record.sectors.len(), 2);
}

#[test]
fn test_silent_board_still_reaches_raw_repl() {
    init_logging();
    let (port, target) = memory_pair("sim");
    let board = spawn_board(
        target,
        BoardOptions {
            version: None,
            ..BoardOptions::default()
        },
    );
    let device = TtBoardDevice::open(
        port,
        DeviceConfig::default().with_handshake(HandshakeConfig {
            version_wait: Duration::from_millis(30),
            ..HandshakeConfig::default()
        }),
    )
    .unwrap();

    device.start(&scripts()).unwrap();
    assert_eq!(device.phase(), SessionPhase::RawReplActive);
    assert_eq!(device.session().shell_version, None);

    // Later commands still work.
    device
        .program_flash(0, &pattern(100, 9), |_, _| {})
        .unwrap();

    device.close().unwrap();
    let record = board.join().unwrap();
    assert_eq!(record.sectors.len(), 1);
}
