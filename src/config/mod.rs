//! Run configuration
//!
//! A TOML file has three optional sections: `[crawler]` for the seed and run
//! limits, `[output]` for the archive root and `[assessment]` for the
//! completeness strategy. Command-line flags override file values, and the
//! merged result is checked with [`validate`] before a run starts.
//!
//! # Example
//!
//! ```
//! use web_archive::config::{parse_config_str, validate};
//!
//! let config = parse_config_str("[crawler]\nseed-url = \"https://example.com/\"\n").unwrap();
//! assert!(validate(&config).is_ok());
//! assert_eq!(config.crawler.max_pages, 200);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{AssessmentConfig, AssessmentStrategy, Config, CrawlConfig, OutputConfig};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, parse_config_str,
};
pub use validation::validate;
