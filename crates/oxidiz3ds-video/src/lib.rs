pub mod args;
pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod custom_tex;
pub mod interval;
pub mod matcher;
pub mod memory;
pub mod params;
pub mod pixel_format;
pub mod regs;
pub mod renderer;
pub mod surface;
pub mod trace;

// Re-export commonly used types
pub use args::Args;
pub use backend::GraphicsBackend;
pub use cache::{CacheStats, Framebuffer, FramebufferConfig, RasterizerCache, SurfaceHandle, TextureConfig, Viewport};
pub use config::{CacheConfig, TextureFilter};
pub use interval::{PAddr, SurfaceInterval};
pub use matcher::{MatchFlags, ScaleMatch};
pub use memory::{MemoryError, MemorySystem, PhysicalMemory};
pub use params::{Rect, SurfaceParams};
pub use pixel_format::PixelFormat;
pub use renderer::Renderer;
