//! Site-specific scraper configurations

pub mod arbeitsagentur;
