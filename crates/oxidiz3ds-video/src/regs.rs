//! Latched GPU external registers.
//!
//! Only the register blocks that move memory around are modelled: the two
//! memory fill units, the display transfer engine and the framebuffer scan-out
//! setup. Writes that start an operation are returned as a [`GpuCommand`] for the
//! renderer to execute.
//!
//! # References
//! - [GPU External Registers](https://www.3dbrew.org/wiki/GPU/External_Registers)
//! - [LCD Registers](https://www.3dbrew.org/wiki/LCD)
//!
//! # Framebuffer Format
//! The 3DS framebuffers are stored rotated: for a 400×240 screen the
//! framebuffer is 400 rows of 240 pixels each.

use crate::interval::PAddr;
use crate::pixel_format::PixelFormat;
use oxidiz3ds_hw::mmio::gpu::{fill_control, registers as hw_regs, transfer_flags};
use oxidiz3ds_hw::specs::display;
use tracing::{debug, trace, warn};

/// Output scaling of a display transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingMode {
    #[default]
    None,
    /// Halve the width
    X,
    /// Halve both dimensions
    XY,
}

/// Line geometry of a texture copy. All values are in 16 byte units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureCopyConfig {
    /// Total bytes to copy
    pub size: u32,
    pub input_width: u32,
    pub input_gap: u32,
    pub output_width: u32,
    pub output_gap: u32,
}

/// Decoded display transfer engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayTransferConfig {
    pub input_address: PAddr,
    pub output_address: PAddr,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub flip_vertically: bool,
    pub input_linear: bool,
    pub crop_input_lines: bool,
    pub is_texture_copy: bool,
    pub dont_swizzle: bool,
    /// Display controller format encodings
    pub input_format: u32,
    pub output_format: u32,
    pub block_32: bool,
    pub scaling: ScalingMode,
    pub texture_copy: TextureCopyConfig,
}

impl DisplayTransferConfig {
    pub fn input_pixel_format(&self) -> PixelFormat {
        PixelFormat::from_gpu_format(self.input_format)
    }

    pub fn output_pixel_format(&self) -> PixelFormat {
        PixelFormat::from_gpu_format(self.output_format)
    }
}

/// Decoded state of one memory fill unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryFillConfig {
    pub start: PAddr,
    pub end: PAddr,
    pub value: u32,
    pub fill_24bit: bool,
    pub fill_32bit: bool,
}

impl MemoryFillConfig {
    /// Bytes in one repetition of the fill pattern.
    pub fn fill_size(&self) -> u32 {
        if self.fill_32bit {
            4
        } else if self.fill_24bit {
            3
        } else {
            2
        }
    }

    /// The fill pattern as it appears in memory, padded to four bytes.
    pub fn fill_data(&self) -> [u8; 4] {
        let bytes = self.value.to_le_bytes();
        if self.fill_32bit {
            bytes
        } else if self.fill_24bit {
            [bytes[2], bytes[1], bytes[0], 0]
        } else {
            [bytes[0], bytes[1], 0, 0]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Top,
    Bottom,
}

/// Scan-out setup of one screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanoutConfig {
    pub address_left: PAddr,
    pub address_right: PAddr,
    /// Display controller format encoding
    pub format: u32,
    /// Bytes per framebuffer row
    pub stride: u32,
    /// Pixels per framebuffer row (the screen's height)
    pub width: u32,
    /// Number of rows (the screen's width)
    pub height: u32,
}

impl ScanoutConfig {
    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_gpu_format(self.format)
    }
}

/// Operation started by a register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuCommand {
    MemoryFill { unit: usize, config: MemoryFillConfig },
    DisplayTransfer(DisplayTransferConfig),
}

#[derive(Debug, Clone, Copy, Default)]
struct ScreenRegs {
    left: u32,
    right: u32,
    format: u32,
    stride: u32,
}

/// GPU external register file
#[derive(Debug, Default)]
pub struct GpuRegs {
    top: ScreenRegs,
    bottom: ScreenRegs,
    /// start, end, value, control per unit
    fill: [[u32; 4]; 2],
    /// Display transfer block, indexed by word from `DISPLAY_TRANSFER`
    transfer: [u32; 11],
}

const TRANSFER_WORDS: u32 = 11;

impl GpuRegs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a write to a GPU register
    pub fn write(&mut self, offset: u32, value: u32) -> Option<GpuCommand> {
        trace!("GPU register write: offset={:#X}, value={:#X}", offset, value);

        match offset {
            hw_regs::FRAMEBUFFER_TOP_LEFT => self.top.left = value,
            hw_regs::FRAMEBUFFER_TOP_RIGHT => self.top.right = value,
            hw_regs::FRAMEBUFFER_TOP_FORMAT => {
                self.top.format = value;
                debug!("Top screen format: {}", PixelFormat::from_gpu_format(value & 7));
            }
            hw_regs::FRAMEBUFFER_TOP_STRIDE => self.top.stride = value,
            hw_regs::FRAMEBUFFER_BOTTOM_LEFT => self.bottom.left = value,
            hw_regs::FRAMEBUFFER_BOTTOM_FORMAT => {
                self.bottom.format = value;
                debug!("Bottom screen format: {}", PixelFormat::from_gpu_format(value & 7));
            }
            hw_regs::FRAMEBUFFER_BOTTOM_STRIDE => self.bottom.stride = value,
            _ => {
                if let Some((unit, word)) = fill_slot(offset) {
                    return self.write_fill(unit, word, value);
                }
                if let Some(word) = transfer_slot(offset) {
                    self.transfer[word] = value;
                    if offset == hw_regs::TRANSFER_TRIGGER && value & 1 != 0 {
                        let config = self.display_transfer();
                        debug!("Display transfer triggered: {:?}", config);
                        return Some(GpuCommand::DisplayTransfer(config));
                    }
                    return None;
                }
                warn!("Unknown GPU register write: offset={:#X}, value={:#X}", offset, value);
            }
        }
        None
    }

    /// Handle a read from a GPU register
    pub fn read(&self, offset: u32) -> u32 {
        trace!("GPU register read: offset={:#X}", offset);

        match offset {
            hw_regs::FRAMEBUFFER_TOP_LEFT => self.top.left,
            hw_regs::FRAMEBUFFER_TOP_RIGHT => self.top.right,
            hw_regs::FRAMEBUFFER_TOP_FORMAT => self.top.format,
            hw_regs::FRAMEBUFFER_TOP_STRIDE => self.top.stride,
            hw_regs::FRAMEBUFFER_BOTTOM_LEFT => self.bottom.left,
            hw_regs::FRAMEBUFFER_BOTTOM_FORMAT => self.bottom.format,
            hw_regs::FRAMEBUFFER_BOTTOM_STRIDE => self.bottom.stride,
            _ => {
                if let Some((unit, word)) = fill_slot(offset) {
                    return self.fill[unit][word];
                }
                if let Some(word) = transfer_slot(offset) {
                    return self.transfer[word];
                }
                warn!("Unknown GPU register read: offset={:#X}", offset);
                0
            }
        }
    }

    fn write_fill(&mut self, unit: usize, word: usize, value: u32) -> Option<GpuCommand> {
        self.fill[unit][word] = value;
        if word != (hw_regs::MEMORY_FILL_CONTROL / 4) as usize || value & fill_control::TRIGGER == 0 {
            return None;
        }
        let config = self.memory_fill(unit);
        debug!("Memory fill {} triggered: {:?}", unit, config);
        Some(GpuCommand::MemoryFill { unit, config })
    }

    /// Clears the trigger and raises the finished bit of a fill unit.
    pub fn complete_fill(&mut self, unit: usize) {
        let control = &mut self.fill[unit][(hw_regs::MEMORY_FILL_CONTROL / 4) as usize];
        *control = (*control & !fill_control::TRIGGER) | fill_control::FINISHED;
    }

    /// Clears the transfer trigger.
    pub fn complete_transfer(&mut self) {
        self.transfer[((hw_regs::TRANSFER_TRIGGER - hw_regs::DISPLAY_TRANSFER) / 4) as usize] &= !1;
    }

    pub fn memory_fill(&self, unit: usize) -> MemoryFillConfig {
        let [start, end, value, control] = self.fill[unit];
        MemoryFillConfig {
            start: start << 3,
            end: end << 3,
            value,
            fill_24bit: control & fill_control::FILL_24BIT != 0,
            fill_32bit: control & fill_control::FILL_32BIT != 0,
        }
    }

    pub fn display_transfer(&self) -> DisplayTransferConfig {
        let reg = |offset: u32| self.transfer[((offset - hw_regs::DISPLAY_TRANSFER) / 4) as usize];
        let flags = reg(hw_regs::TRANSFER_FLAGS);
        let (output_size, input_size) = (reg(hw_regs::TRANSFER_OUTPUT_SIZE), reg(hw_regs::TRANSFER_INPUT_SIZE));
        let (input_line, output_line) = (reg(hw_regs::TEXCOPY_INPUT_LINE), reg(hw_regs::TEXCOPY_OUTPUT_LINE));

        DisplayTransferConfig {
            input_address: reg(hw_regs::TRANSFER_INPUT_ADDR) << 3,
            output_address: reg(hw_regs::TRANSFER_OUTPUT_ADDR) << 3,
            input_width: input_size & 0xFFFF,
            input_height: input_size >> 16,
            output_width: output_size & 0xFFFF,
            output_height: output_size >> 16,
            flip_vertically: flags & transfer_flags::FLIP_VERTICALLY != 0,
            input_linear: flags & transfer_flags::INPUT_LINEAR != 0,
            crop_input_lines: flags & transfer_flags::CROP_INPUT_LINES != 0,
            is_texture_copy: flags & transfer_flags::IS_TEXTURE_COPY != 0,
            dont_swizzle: flags & transfer_flags::DONT_SWIZZLE != 0,
            input_format: (flags >> transfer_flags::INPUT_FORMAT_SHIFT) & transfer_flags::FORMAT_MASK,
            output_format: (flags >> transfer_flags::OUTPUT_FORMAT_SHIFT) & transfer_flags::FORMAT_MASK,
            block_32: flags & transfer_flags::BLOCK_32 != 0,
            scaling: match (flags >> transfer_flags::SCALING_SHIFT) & transfer_flags::SCALING_MASK {
                1 => ScalingMode::X,
                2 => ScalingMode::XY,
                _ => ScalingMode::None,
            },
            texture_copy: TextureCopyConfig {
                size: reg(hw_regs::TEXCOPY_SIZE),
                input_width: input_line & 0xFFFF,
                input_gap: input_line >> 16,
                output_width: output_line & 0xFFFF,
                output_gap: output_line >> 16,
            },
        }
    }

    pub fn scanout(&self, screen: Screen) -> ScanoutConfig {
        let (regs, width, height) = match screen {
            Screen::Top => (&self.top, display::TOP_HEIGHT, display::TOP_WIDTH),
            Screen::Bottom => (&self.bottom, display::BOTTOM_HEIGHT, display::BOTTOM_WIDTH),
        };
        ScanoutConfig {
            address_left: regs.left,
            address_right: regs.right,
            format: regs.format & 7,
            stride: regs.stride,
            width,
            height,
        }
    }
}

fn fill_slot(offset: u32) -> Option<(usize, usize)> {
    [hw_regs::MEMORY_FILL_0, hw_regs::MEMORY_FILL_1]
        .iter()
        .position(|base| (*base..*base + hw_regs::MEMORY_FILL_BLOCK_SIZE).contains(&offset))
        .map(|unit| {
            let base = if unit == 0 { hw_regs::MEMORY_FILL_0 } else { hw_regs::MEMORY_FILL_1 };
            (unit, ((offset - base) / 4) as usize)
        })
}

fn transfer_slot(offset: u32) -> Option<usize> {
    let word = offset.checked_sub(hw_regs::DISPLAY_TRANSFER)? / 4;
    (word < TRANSFER_WORDS && offset % 4 == 0).then_some(word as usize)
}
