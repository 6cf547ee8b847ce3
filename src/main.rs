use std::sync::Arc;

use anyhow::{Result, bail};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use advert_harvester::browser::HtmlBrowser;
use advert_harvester::captcha::TwoCaptchaSolver;
use advert_harvester::config::{BrowserEngine, Config};
use advert_harvester::database::Database;
use advert_harvester::discord::DiscordNotifier;
use advert_harvester::models::{FilterSpec, RunOutcome};
use advert_harvester::run_controller::{EngineSettings, RunController};
use advert_harvester::scrapers::arbeitsagentur;
use advert_harvester::traits::BrowserSession;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting advert harvester");

    let config = Config::from_env()?;
    let controller = build_controller(&config).await?;

    match controller.captcha_balance().await {
        Ok(Some(balance)) => info!("2Captcha balance: {:.2}", balance),
        Ok(None) => warn!("TWOCAPTCHA_API_KEY not set - adverts behind a CAPTCHA will fail"),
        Err(e) => warn!("Could not read 2Captcha balance: {:#}", e),
    }

    spawn_stop_on_ctrl_c(controller.clone());

    // Run once immediately
    let outcome = run_once(&controller, &config.filters).await;

    let Some(schedule) = config.scrape_schedule.clone() else {
        if let Some(outcome) = outcome.filter(RunOutcome::is_fatal) {
            bail!("scrape run {}", outcome);
        }
        return Ok(());
    };

    let sched = JobScheduler::new().await?;

    let job_controller = controller.clone();
    let job_filters = config.filters.clone();
    sched
        .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let controller = job_controller.clone();
            let filters = job_filters.clone();
            Box::pin(async move {
                run_once(&controller, &filters).await;
            })
        })?)
        .await?;

    info!("Scheduler started - running on \"{}\"", schedule);
    sched.start().await?;

    // Keep the program running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
    }
}

async fn build_controller(config: &Config) -> Result<RunController> {
    let database = Database::new(&config.database_url).await?;
    let browser = open_browser(config).await?;
    let notifier = DiscordNotifier::new(config.discord_webhook_url.clone());

    let mut controller = RunController::new(
        arbeitsagentur::config(&config.search_base_url),
        EngineSettings::from(config),
        browser,
        Arc::new(database),
    )
    .with_status_sink(Arc::new(notifier));

    if let Some(api_key) = &config.twocaptcha_api_key {
        controller = controller.with_solver(Arc::new(TwoCaptchaSolver::new(api_key)?));
    }

    Ok(controller)
}

async fn open_browser(config: &Config) -> Result<Arc<dyn BrowserSession>> {
    match config.browser_engine {
        BrowserEngine::Html => {
            warn!("Using the static HTML driver - JavaScript controls on the site will not work");
            Ok(Arc::new(HtmlBrowser::new()?))
        }
        BrowserEngine::Chrome => open_chrome(config).await,
    }
}

#[cfg(feature = "browser")]
async fn open_chrome(config: &Config) -> Result<Arc<dyn BrowserSession>> {
    use advert_harvester::browser::{ChromeBrowser, ChromeOptions};

    let options = ChromeOptions {
        headless: config.chrome_headless,
        remote_url: config.chrome_remote_url.clone(),
    };
    Ok(Arc::new(ChromeBrowser::launch(&options).await?))
}

#[cfg(not(feature = "browser"))]
async fn open_chrome(_config: &Config) -> Result<Arc<dyn BrowserSession>> {
    bail!("Browser support not compiled. Rebuild with: cargo build --features browser")
}

async fn run_once(controller: &RunController, filters: &FilterSpec) -> Option<RunOutcome> {
    match controller.start(filters).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            info!("Skipping run: {}", e);
            None
        }
    }
}

/// First Ctrl-C stops the running session, a Ctrl-C while idle exits
fn spawn_stop_on_ctrl_c(controller: RunController) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {}", e);
                return;
            }
            if !controller.request_stop() {
                info!("No scrape session running, shutting down");
                std::process::exit(0);
            }
        }
    });
}
