//! `fel` — talk to an Allwinner SoC stuck in FEL (USB boot) mode.
//!
//! Options come first, then any number of chained commands:
//!
//!     fel -p spl u-boot-spl.bin write 0x43100000 boot.scr
//!
//! Commands run left to right over one USB session; the first failure
//! aborts with a nonzero exit code.

use std::io::{Read, Write};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use fel::device::ProgressFn;
use fel::{image, soc, FelDevice};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Parser)]
#[clap(name = "fel")]
#[clap(about = "Allwinner FEL boot-recovery tool", long_about = None)]
#[clap(trailing_var_arg = true)]
struct Cli {
    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Show a progress bar when transferring large files
    #[clap(short, long)]
    progress: bool,

    /// Use a specific USB device, as bus:devnum
    #[clap(short, long, value_name = "BUS:DEV")]
    dev: Option<String>,

    /// Commands and their arguments: hex[dump] addr len | dump addr
    /// len | exe[cute] addr | ver[sion] | read addr len file | write
    /// addr file | clear addr len | fill addr len value | spl file |
    /// uboot file
    #[clap(required = true)]
    commands: Vec<String>,
}

/// Cursor over the chained command words.
struct CommandStream<'a> {
    words: &'a [String],
    pos: usize,
}

impl<'a> CommandStream<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let word = self.words.get(self.pos)?;
        self.pos += 1;
        Some(word.as_str())
    }

    fn arg(&mut self, command: &str, what: &str) -> Result<&'a str> {
        self.next()
            .ok_or_else(|| anyhow!("missing {} argument for '{}'", what, command))
    }

    fn num(&mut self, command: &str, what: &str) -> Result<u32> {
        parse_num(self.arg(command, what)?)
    }
}

/// Numbers on the command line come in C flavors: decimal, 0x hex or
/// leading-0 octal.
fn parse_num(word: &str) -> Result<u32> {
    let parsed = if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if word.len() > 1 && word.starts_with('0') {
        u32::from_str_radix(&word[1..], 8)
    } else {
        word.parse()
    };
    parsed.with_context(|| format!("invalid number '{}'", word))
}

fn parse_bus_dev(spec: &str) -> Result<(u8, u8)> {
    let (bus, dev) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("expected BUS:DEV, got '{}'", spec))?;
    let bus = u8::try_from(parse_num(bus)?).context("bus number out of range")?;
    let dev = u8::try_from(parse_num(dev)?).context("device number out of range")?;
    Ok((bus, dev))
}

/// Read a whole file, `-` meaning standard input.
fn load_file(path: &str) -> Result<Vec<u8>> {
    if path == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .context("reading standard input")?;
        Ok(data)
    } else {
        std::fs::read(path).with_context(|| format!("reading '{}'", path))
    }
}

fn hexdump(buf: &[u8], offset: u32) {
    for (row, chunk) in buf.chunks(16).enumerate() {
        print!("{:08x}: ", offset as u64 + row as u64 * 16);
        for index in 0..16 {
            match chunk.get(index) {
                Some(byte) => print!("{:02x} ", byte),
                None => print!("__ "),
            }
        }
        print!(" ");
        for index in 0..16 {
            match chunk.get(index) {
                Some(&byte) if byte.is_ascii_graphic() || byte == b' ' => {
                    print!("{}", byte as char)
                }
                _ => print!("."),
            }
        }
        println!();
    }
}

/// An indicatif bar behind the library's progress callback. Only
/// multi-chunk transfers get a bar; a bar is created per transfer and
/// finished when its last chunk lands.
fn progress_sink() -> ProgressFn {
    let mut bar: Option<ProgressBar> = None;
    Box::new(move |total, done, chunk| {
        if chunk >= total {
            return;
        }
        if bar.is_none() {
            let fresh = ProgressBar::new(total as u64);
            fresh.set_style(
                ProgressStyle::with_template("{percent:>3}% [{bar:60}] {bytes}/{total_bytes}")
                    .expect("static progress template"),
            );
            bar = Some(fresh);
        }
        if let Some(active) = &bar {
            active.set_position(done as u64);
        }
        if done >= total {
            if let Some(active) = bar.take() {
                active.finish();
            }
        }
    })
}

fn print_version(device: &FelDevice) {
    let version = device.version();
    let end = version
        .signature
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(version.signature.len());
    println!(
        "{} soc={:08x}({}) {:08x} ver={:04x} {:02x} {:02x} scratchpad={:08x} {:08x} {:08x}",
        String::from_utf8_lossy(&version.signature[..end]),
        version.soc_id,
        soc::soc_name(version.soc_id).unwrap_or("unknown"),
        version.firmware,
        version.protocol,
        version.dflag,
        version.dlength,
        version.scratchpad,
        version.pad[0],
        version.pad[1],
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::new();
    builder.filter_level(if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    });
    builder.parse_default_env();
    builder.init();

    let filter = cli.dev.as_deref().map(parse_bus_dev).transpose()?;
    let mut device = FelDevice::open(filter).context("opening FEL device")?;
    if cli.progress {
        device.set_progress(progress_sink());
    }

    let mut stream = CommandStream { words: &cli.commands, pos: 0 };
    let mut uboot_autostart = false;

    while let Some(command) = stream.next() {
        match command {
            c if c.starts_with("hex") => {
                let addr = stream.num(c, "address")?;
                let len = stream.num(c, "length")?;
                let mut buf = vec![0u8; len as usize];
                device.read(addr, &mut buf)?;
                hexdump(&buf, addr);
            }
            "dump" => {
                let addr = stream.num(command, "address")?;
                let len = stream.num(command, "length")?;
                let mut buf = vec![0u8; len as usize];
                device.read(addr, &mut buf)?;
                std::io::stdout().write_all(&buf).context("writing to stdout")?;
            }
            c if c.starts_with("exe") => {
                let addr = stream.num(c, "address")?;
                device.execute(addr)?;
            }
            c if c.starts_with("ver") => {
                print_version(&device);
            }
            "read" => {
                let addr = stream.num(command, "address")?;
                let len = stream.num(command, "length")?;
                let path = stream.arg(command, "file")?;
                let mut buf = vec![0u8; len as usize];
                device.read(addr, &mut buf)?;
                std::fs::write(path, &buf).with_context(|| format!("writing '{}'", path))?;
            }
            "write" => {
                let addr = stream.num(command, "address")?;
                let path = stream.arg(command, "file")?;
                let data = load_file(path)?;
                let start = Instant::now();
                device.write(addr, &data)?;
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    log::info!(
                        "written {:.1} KB in {:.1} sec (speed: {:.1} KB/s)",
                        data.len() as f64 / 1000.0,
                        elapsed,
                        data.len() as f64 / elapsed / 1000.0
                    );
                }
                // a transferred boot script is announced to U-Boot
                // through the SPL header
                if matches!(image::image_type(&data), Ok(image::TYPE_SCRIPT)) {
                    device.pass_fel_information(addr)?;
                }
            }
            "clear" => {
                let addr = stream.num(command, "address")?;
                let len = stream.num(command, "length")?;
                device.fill(addr, len as usize, 0)?;
            }
            "fill" => {
                let addr = stream.num(command, "address")?;
                let len = stream.num(command, "length")?;
                let value = stream.num(command, "value")?;
                device.fill(addr, len as usize, value as u8)?;
            }
            "spl" => {
                let data = load_file(stream.arg(command, "file")?)?;
                device.process_spl_and_uboot(&data)?;
            }
            "uboot" => {
                let data = load_file(stream.arg(command, "file")?)?;
                device.process_spl_and_uboot(&data)?;
                uboot_autostart = device.uboot().is_some();
                if !uboot_autostart {
                    log::warn!("'uboot' did not detect a main image, nothing to execute");
                }
            }
            _ => bail!("unknown command '{}'", command),
        }
    }

    // requested by the "uboot" command: hand over once all commands
    // (e.g. further "write"s of boot files) are done
    if uboot_autostart {
        if let Some(uboot) = device.uboot() {
            log::info!("starting U-Boot at {:#010x}", uboot.entry);
            device.execute(uboot.entry)?;
        }
    }

    Ok(())
}
