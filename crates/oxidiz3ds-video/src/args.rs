use crate::config::{CacheConfig, TextureFilter};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Path to the trace file to replay. See the `trace` module for the format.
    pub trace: PathBuf,

    /// Internal resolution multiplier for render targets
    #[arg(long, short = 's', default_value_t = 1)]
    pub resolution_scale: u16,

    /// Filter used when textures are scaled on the host
    #[arg(long, value_enum, default_value_t = TextureFilter::None)]
    pub texture_filter: TextureFilter,

    /// Hand every uploaded texture to the texture pack for dumping
    #[arg(long)]
    pub dump_textures: bool,

    /// Decode custom textures on the calling thread
    #[arg(long)]
    pub sync_custom_loading: bool,

    /// Convert color surfaces to RGBA8 on the host, as GLES backends do
    #[arg(long)]
    pub convert: bool,

    /// Flush every dirty byte to memory before printing the final statistics
    #[arg(long)]
    pub flush_on_exit: bool,
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.resolution_scale) {
            return Err(format!(
                "--resolution-scale must be between 1 and 10, got {}",
                self.resolution_scale
            ));
        }
        Ok(())
    }

    /// Convert Args to CacheConfig
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            resolution_scale: self.resolution_scale,
            texture_filter: self.texture_filter,
            use_custom_textures: false,
            dump_textures: self.dump_textures,
            async_custom_loading: !self.sync_custom_loading,
        }
    }
}

pub fn parse_hex_or_dec(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hex_or_dec() {
        assert_eq!(parse_hex_or_dec("0x1F"), Ok(31));
        assert_eq!(parse_hex_or_dec("0X10"), Ok(16));
        assert_eq!(parse_hex_or_dec("42"), Ok(42));
        assert!(parse_hex_or_dec("0xZZ").is_err());
    }

    #[test]
    fn test_args_to_config() {
        let args = Args::parse_from(["cli", "frame.trace", "-s", "3", "--texture-filter", "bilinear"]);
        args.validate().unwrap();
        let config = args.to_cache_config();
        assert_eq!(config.resolution_scale, 3);
        assert_eq!(config.texture_filter, TextureFilter::Bilinear);
        assert!(config.async_custom_loading);

        let args = Args::parse_from(["cli", "frame.trace", "-s", "0"]);
        assert!(args.validate().is_err());
    }
}
