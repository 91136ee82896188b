//! # References
//! - <https://www.3dbrew.org/wiki/GPU/External_Registers>
//! - <https://www.3dbrew.org/wiki/LCD>

/// GPU external register offsets, relative to the 0x10400000 register block
pub mod registers {
    /// Top screen left framebuffer address register
    ///
    /// Reference: <https://www.3dbrew.org/wiki/GPU/External_Registers#Framebuffers>
    pub const FRAMEBUFFER_TOP_LEFT: u32 = 0x468;

    /// Top screen framebuffer pixel format register
    pub const FRAMEBUFFER_TOP_FORMAT: u32 = 0x470;

    /// Top screen framebuffer stride (bytes per row) register
    pub const FRAMEBUFFER_TOP_STRIDE: u32 = 0x490;

    /// Top screen right framebuffer address register (for 3D mode)
    pub const FRAMEBUFFER_TOP_RIGHT: u32 = 0x494;

    /// Bottom screen framebuffer address register
    pub const FRAMEBUFFER_BOTTOM_LEFT: u32 = 0x568;

    /// Bottom screen framebuffer pixel format register
    pub const FRAMEBUFFER_BOTTOM_FORMAT: u32 = 0x570;

    /// Bottom screen framebuffer stride register
    pub const FRAMEBUFFER_BOTTOM_STRIDE: u32 = 0x590;

    /// Memory fill unit 0 (PSC0)
    ///
    /// Reference: <https://www.3dbrew.org/wiki/GPU/External_Registers#Memory_Fill>
    pub const MEMORY_FILL_0: u32 = 0x010;

    /// Memory fill unit 1 (PSC1)
    pub const MEMORY_FILL_1: u32 = 0x020;

    /// Size of one memory fill register block
    pub const MEMORY_FILL_BLOCK_SIZE: u32 = 0x10;

    /// Fill start address (physical address >> 3), relative to a fill block
    pub const MEMORY_FILL_START: u32 = 0x0;

    /// Fill end address (physical address >> 3), relative to a fill block
    pub const MEMORY_FILL_END: u32 = 0x4;

    /// Fill value, relative to a fill block
    pub const MEMORY_FILL_VALUE: u32 = 0x8;

    /// Fill control: bit 0 trigger, bit 1 finished, bit 8 24-bit, bit 9 32-bit
    pub const MEMORY_FILL_CONTROL: u32 = 0xC;

    /// Display transfer engine (PPF) register block
    ///
    /// Reference: <https://www.3dbrew.org/wiki/GPU/External_Registers#Transfer_Engine>
    pub const DISPLAY_TRANSFER: u32 = 0xC00;

    /// Input physical address >> 3
    pub const TRANSFER_INPUT_ADDR: u32 = 0xC00;

    /// Output physical address >> 3
    pub const TRANSFER_OUTPUT_ADDR: u32 = 0xC04;

    /// Output dimensions: width in bits 0-15, height in bits 16-31
    pub const TRANSFER_OUTPUT_SIZE: u32 = 0xC08;

    /// Input dimensions: width in bits 0-15, height in bits 16-31
    pub const TRANSFER_INPUT_SIZE: u32 = 0xC0C;

    /// Transfer flags (flip, tiling, formats, scaling, texture copy mode)
    pub const TRANSFER_FLAGS: u32 = 0xC10;

    /// Writing bit 0 starts the transfer
    pub const TRANSFER_TRIGGER: u32 = 0xC18;

    /// Texture copy total size in bytes
    pub const TEXCOPY_SIZE: u32 = 0xC20;

    /// Texture copy input line width (bits 0-15) and gap (bits 16-31), in 16 byte units
    pub const TEXCOPY_INPUT_LINE: u32 = 0xC24;

    /// Texture copy output line width (bits 0-15) and gap (bits 16-31), in 16 byte units
    pub const TEXCOPY_OUTPUT_LINE: u32 = 0xC28;
}

/// Bit fields of the display transfer flags register
///
/// Reference: <https://www.3dbrew.org/wiki/GPU/External_Registers#Transfer_Engine>
pub mod transfer_flags {
    pub const FLIP_VERTICALLY: u32 = 1 << 0;
    pub const INPUT_LINEAR: u32 = 1 << 1;
    pub const CROP_INPUT_LINES: u32 = 1 << 2;
    pub const IS_TEXTURE_COPY: u32 = 1 << 3;
    pub const DONT_SWIZZLE: u32 = 1 << 5;
    pub const INPUT_FORMAT_SHIFT: u32 = 8;
    pub const OUTPUT_FORMAT_SHIFT: u32 = 12;
    pub const FORMAT_MASK: u32 = 0x7;
    pub const BLOCK_32: u32 = 1 << 16;
    pub const SCALING_SHIFT: u32 = 24;
    pub const SCALING_MASK: u32 = 0x3;
}

/// Bit fields of the memory fill control register
pub mod fill_control {
    pub const TRIGGER: u32 = 1 << 0;
    pub const FINISHED: u32 = 1 << 1;
    pub const FILL_24BIT: u32 = 1 << 8;
    pub const FILL_32BIT: u32 = 1 << 9;
}

/// Pixel format values for framebuffer format registers
///
/// These correspond to bits 0-2 of the format register.
///
/// Reference: <https://www.3dbrew.org/wiki/GPU/External_Registers#Framebuffer_format>
pub mod pixel_format {
    /// RGBA8 (32 bits per pixel)
    pub const RGBA8: u32 = 0;
    /// RGB8 (24 bits per pixel)
    pub const RGB8: u32 = 1;
    /// RGB565 (16 bits per pixel)
    pub const RGB565: u32 = 2;
    /// RGB5A1 (16 bits per pixel)
    pub const RGB5A1: u32 = 3;
    /// RGBA4 (16 bits per pixel)
    pub const RGBA4: u32 = 4;
}
