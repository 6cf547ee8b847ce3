//! Job-advert harvester: walks a job-board result list, extracts each advert
//! (answering the contact-details CAPTCHA when needed) and stores it.

pub mod breaker;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod database;
pub mod discord;
pub mod extract;
pub mod ledger;
pub mod models;
pub mod pagination;
pub mod query;
pub mod run_controller;
pub mod run_state;
pub mod scraper;
pub mod scrapers;
pub mod traits;
