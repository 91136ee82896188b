/// Display specifications
pub mod display {
    /// Top screen width in pixels
    pub const TOP_WIDTH: u32 = 400;

    /// Top screen height in pixels
    pub const TOP_HEIGHT: u32 = 240;

    /// Bottom screen width in pixels
    pub const BOTTOM_WIDTH: u32 = 320;

    /// Bottom screen height in pixels
    pub const BOTTOM_HEIGHT: u32 = 240;
}
