//! Text traces of GPU and CPU memory traffic.
//!
//! One command per line; `#` starts a comment. Numbers are decimal or
//! `0x`-prefixed hex.
//!
//! ```text
//! map VRAM 0x18000000 0x600000
//! write 0x18000000 00ff00ff
//! reg 0x1C 0x1           # GPU external register write
//! texture 0x18000000 64 64 RGBA8 0
//! read 0x18000000 16
//! flush
//! tick
//! clear
//! ```
//!
//! `map` lines must come before everything else, since they describe the
//! memory the renderer is built on. A trace without any `map` line runs on
//! the stock VRAM, AXI WRAM and FCRAM layout.

use crate::args::parse_hex_or_dec;
use crate::backend::GraphicsBackend;
use crate::cache::TextureConfig;
use crate::config::CacheConfig;
use crate::interval::PAddr;
use crate::memory::{MemoryError, PhysicalMemory};
use crate::pixel_format::PixelFormat;
use crate::renderer::Renderer;
use std::fmt::Write as _;
use std::str::SplitWhitespace;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: unknown command `{command}`")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: `{command}` is missing its {argument} argument")]
    MissingArgument {
        line: usize,
        command: String,
        argument: &'static str,
    },
    #[error("line {line}: `{value}` is not a 32-bit number")]
    InvalidNumber { line: usize, value: String },
    #[error("line {line}: `{value}` is not an even-length hex byte string")]
    InvalidBytes { line: usize, value: String },
    #[error("line {line}: unknown pixel format `{name}`")]
    UnknownFormat { line: usize, name: String },
    #[error("line {line}: `map` after the first non-map command")]
    LateMap { line: usize },
    #[error("line {line}: {source}")]
    Memory {
        line: usize,
        #[source]
        source: MemoryError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceCommand {
    /// Back `[base, base + size)` with zeroed memory
    Map { name: String, base: PAddr, size: u32 },
    /// CPU write
    Write { addr: PAddr, data: Vec<u8> },
    /// CPU read, printed as hex
    Read { addr: PAddr, len: u32 },
    /// GPU external register write
    Reg { offset: u32, value: u32 },
    /// Texture unit lookup
    Texture(TextureConfig),
    /// Write back dirty data, everything when no range is given
    Flush(Option<(PAddr, u32)>),
    Tick,
    Clear,
}

/// A trace command with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub line: usize,
    pub command: TraceCommand,
}

/// Parses a whole trace.
pub fn parse_trace(source: &str) -> Result<Vec<TraceLine>, TraceError> {
    let mut commands: Vec<TraceLine> = Vec::new();
    let mut mapping = true;
    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        let Some(command) = parse_line(line, text)? else {
            continue;
        };
        match command {
            TraceCommand::Map { .. } if !mapping => return Err(TraceError::LateMap { line }),
            TraceCommand::Map { .. } => {}
            _ => mapping = false,
        }
        commands.push(TraceLine { line, command });
    }
    debug!("Parsed {} trace commands", commands.len());
    Ok(commands)
}

/// Parses one line. Blank and comment lines give `None`.
pub fn parse_line(line: usize, text: &str) -> Result<Option<TraceCommand>, TraceError> {
    let text = text.split('#').next().unwrap_or_default();
    let mut words = text.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let mut args = Words { line, command, words };

    let parsed = match command {
        "map" => TraceCommand::Map {
            name: args.word("name")?.to_string(),
            base: args.number("base")?,
            size: args.number("size")?,
        },
        "write" => TraceCommand::Write {
            addr: args.number("address")?,
            data: args.bytes()?,
        },
        "read" => TraceCommand::Read {
            addr: args.number("address")?,
            len: args.number("length")?,
        },
        "reg" => TraceCommand::Reg {
            offset: args.number("offset")?,
            value: args.number("value")?,
        },
        "texture" => TraceCommand::Texture(TextureConfig {
            addr: args.number("address")?,
            width: args.number("width")?,
            height: args.number("height")?,
            format: args.format()?,
            max_level: args.optional_number()?.unwrap_or(0),
        }),
        "flush" => match args.optional_number()? {
            Some(addr) => TraceCommand::Flush(Some((addr, args.number("size")?))),
            None => TraceCommand::Flush(None),
        },
        "tick" => TraceCommand::Tick,
        "clear" => TraceCommand::Clear,
        other => {
            return Err(TraceError::UnknownCommand {
                line,
                command: other.to_string(),
            });
        }
    };
    Ok(Some(parsed))
}

/// Remaining arguments of one trace line.
struct Words<'a> {
    line: usize,
    command: &'a str,
    words: SplitWhitespace<'a>,
}

impl<'a> Words<'a> {
    fn word(&mut self, argument: &'static str) -> Result<&'a str, TraceError> {
        self.words.next().ok_or_else(|| TraceError::MissingArgument {
            line: self.line,
            command: self.command.to_string(),
            argument,
        })
    }

    fn parse_number(&self, value: &str) -> Result<u32, TraceError> {
        parse_hex_or_dec(value)
            .ok()
            .and_then(|number| u32::try_from(number).ok())
            .ok_or_else(|| TraceError::InvalidNumber {
                line: self.line,
                value: value.to_string(),
            })
    }

    fn number(&mut self, argument: &'static str) -> Result<u32, TraceError> {
        let value = self.word(argument)?;
        self.parse_number(value)
    }

    fn optional_number(&mut self) -> Result<Option<u32>, TraceError> {
        match self.words.next() {
            Some(value) => self.parse_number(value).map(Some),
            None => Ok(None),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, TraceError> {
        let value = self.word("data")?;
        let invalid = || TraceError::InvalidBytes {
            line: self.line,
            value: value.to_string(),
        };
        if value.len() % 2 != 0 || !value.is_ascii() {
            return Err(invalid());
        }
        (0..value.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&value[i..i + 2], 16).map_err(|_| invalid()))
            .collect()
    }

    fn format(&mut self) -> Result<PixelFormat, TraceError> {
        let name = self.word("format")?;
        PixelFormat::from_name(name).ok_or_else(|| TraceError::UnknownFormat {
            line: self.line,
            name: name.to_string(),
        })
    }
}

/// Builds the memory described by the `map` commands of a trace.
pub fn build_memory(commands: &[TraceLine]) -> Result<PhysicalMemory, TraceError> {
    if !commands.iter().any(|line| matches!(line.command, TraceCommand::Map { .. })) {
        debug!("No map commands, using the 3DS memory layout");
        return Ok(PhysicalMemory::new_3ds());
    }
    let mut memory = PhysicalMemory::new();
    for TraceLine { line, command } in commands {
        if let TraceCommand::Map { name, base, size } = command {
            memory
                .map(name, *base, *size as usize)
                .map_err(|source| TraceError::Memory { line: *line, source })?;
        }
    }
    Ok(memory)
}

/// Runs every non-map command of a trace through `renderer`. Returns the
/// text printed by `read` and `texture` commands.
pub fn replay<B: GraphicsBackend>(
    renderer: &mut Renderer<B>,
    commands: &[TraceLine],
    config: &CacheConfig,
) -> Result<String, TraceError> {
    let mut output = String::new();
    for TraceLine { line, command } in commands {
        let line = *line;
        trace!("Trace line {}: {:?}", line, command);
        let memory_error = |source| TraceError::Memory { line, source };

        match command {
            TraceCommand::Map { .. } => {}
            TraceCommand::Write { addr, data } => renderer.cpu_write(*addr, data).map_err(memory_error)?,
            TraceCommand::Read { addr, len } => {
                let mut buf = vec![0; *len as usize];
                renderer.cpu_read(*addr, &mut buf).map_err(memory_error)?;
                let _ = write!(output, "{:#010X}:", addr);
                for byte in buf {
                    let _ = write!(output, " {:02x}", byte);
                }
                output.push('\n');
            }
            TraceCommand::Reg { offset, value } => renderer.write_register(*offset, *value),
            TraceCommand::Texture(texture) => match renderer.texture(texture) {
                Some(surface) => {
                    let params = surface.params();
                    let _ = writeln!(
                        output,
                        "texture {:#010X}: surface {} {}x{} {} scale {}",
                        texture.addr,
                        surface.id(),
                        params.width,
                        params.height,
                        params.pixel_format,
                        params.res_scale
                    );
                }
                None => {
                    let _ = writeln!(output, "texture {:#010X}: unavailable", texture.addr);
                }
            },
            TraceCommand::Flush(Some((addr, size))) => renderer.cache_mut().flush_region(*addr, *size, None),
            TraceCommand::Flush(None) => renderer.cache_mut().flush_all(),
            TraceCommand::Tick => renderer.end_frame(config),
            TraceCommand::Clear => renderer.cache_mut().clear_all(true),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        let trace = "\
            map VRAM 0x18000000 0x1000\n\
            # comment\n\
            \n\
            write 0x18000000 00ff10 # trailing\n\
            texture 0x18000000 8 8 rgba8\n\
            flush 0x18000000 16\n\
            flush\n";
        let commands: Vec<TraceCommand> = parse_trace(trace)
            .unwrap()
            .into_iter()
            .map(|line| line.command)
            .collect();
        assert_eq!(
            commands,
            vec![
                TraceCommand::Map {
                    name: "VRAM".to_string(),
                    base: 0x1800_0000,
                    size: 0x1000
                },
                TraceCommand::Write {
                    addr: 0x1800_0000,
                    data: vec![0x00, 0xFF, 0x10]
                },
                TraceCommand::Texture(TextureConfig {
                    addr: 0x1800_0000,
                    width: 8,
                    height: 8,
                    format: PixelFormat::Rgba8,
                    max_level: 0
                }),
                TraceCommand::Flush(Some((0x1800_0000, 16))),
                TraceCommand::Flush(None),
            ]
        );
    }

    #[test]
    fn test_build_memory() {
        let commands = parse_trace("map LOW 0 0x100\nmap VRAM 0x18000000 0x100\ntick").unwrap();
        let memory = build_memory(&commands).unwrap();
        assert_eq!(memory.region_name(0x10), Some("LOW"));
        assert_eq!(memory.region_name(0x1800_0200), None);

        let memory = build_memory(&parse_trace("tick").unwrap()).unwrap();
        assert_eq!(memory.region_name(0x1800_0200), Some("VRAM"));
        assert_eq!(memory.region_name(0x2000_0000), Some("FCRAM"));

        let overlapping = parse_trace("map A 0 0x100\nmap B 0x80 0x100").unwrap();
        assert!(matches!(
            build_memory(&overlapping),
            Err(TraceError::Memory {
                line: 2,
                source: MemoryError::Overlap { .. }
            })
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_line(3, "jump 0x10"),
            Err(TraceError::UnknownCommand {
                line: 3,
                command: "jump".to_string()
            })
        );
        assert_eq!(
            parse_line(1, "read 0x10"),
            Err(TraceError::MissingArgument {
                line: 1,
                command: "read".to_string(),
                argument: "length"
            })
        );
        assert_eq!(
            parse_line(1, "write 0x10 abc"),
            Err(TraceError::InvalidBytes {
                line: 1,
                value: "abc".to_string()
            })
        );
        assert_eq!(
            parse_line(1, "reg 0x100000000 1"),
            Err(TraceError::InvalidNumber {
                line: 1,
                value: "0x100000000".to_string()
            })
        );
        assert_eq!(
            parse_line(1, "texture 0x10 8 8 RGB9"),
            Err(TraceError::UnknownFormat {
                line: 1,
                name: "RGB9".to_string()
            })
        );
        assert_eq!(
            parse_trace("tick\nmap VRAM 0 16"),
            Err(TraceError::LateMap { line: 2 })
        );
    }
}
