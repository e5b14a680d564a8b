//! idcanon CLI entry point

use std::process::ExitCode;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use idcanon::external::create_matcher;
use idcanon::{
    cluster, output, report, source, Blacklist, CachedMatcher, CancelToken, Cli, IdcanonError,
    Matcher, People,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("idcanon=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!("failed to install the signal handler: {}", err);
        }
    }

    match run(&cli, &cancel) {
        Ok(()) => {
            report::write();
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            err.exit_code()
        }
    }
}

fn run(cli: &Cli, cancel: &CancelToken) -> idcanon::Result<()> {
    let start = Instant::now();
    let blacklist = Blacklist::load()?;

    tracing::info!("looking for people in commits");
    let progress = spinner("reading commit signatures...");
    let signatures = source::find_signatures(&cli.database_options(), &cli.signature_cache_path())?;
    progress.finish_and_clear();
    ensure_not_cancelled(cancel)?;
    report::commit("signatures", signatures.len() as i64);

    let (mut people, freqs) = People::build(&signatures, &blacklist, Utc::now(), cli.months)?;
    drop(signatures);
    report::commit("people_found", people.len() as i64);
    tracing::info!(
        elapsed = ?start.elapsed(),
        people = people.len(),
        "found people"
    );

    let matcher: Option<CachedMatcher> = match cli.external {
        Some(provider) => {
            let inner = create_matcher(
                provider.as_str(),
                &cli.api_url,
                &cli.token,
                cancel.clone(),
            )?;
            Some(CachedMatcher::new(
                inner,
                &cli.external_cache_path_for(provider),
            )?)
        }
        None => None,
    };

    let progress = spinner("clustering identities...");
    cluster::reduce_people(
        &mut people,
        matcher.as_ref().map(|m| m as &dyn Matcher),
        &blacklist,
        cli.max_identities,
    )?;
    progress.finish_and_clear();
    ensure_not_cancelled(cancel)?;
    report::commit("people_after_merge", people.len() as i64);
    tracing::info!(people = people.len(), "reduced people");

    people.set_primary_values(&freqs, cli.min_recent_count)?;

    let provider = cli.external.map(|p| p.as_str()).unwrap_or("");
    output::write_parquet(&people, &cli.output, provider)?;
    if let Some(matcher) = &matcher {
        matcher.dump_cache()?;
    }

    report::commit("elapsed_sec", start.elapsed().as_secs_f64());
    eprintln!(
        "  {} {} identities written to {}",
        style("✓").green(),
        people.len(),
        cli.output
    );
    Ok(())
}

fn ensure_not_cancelled(cancel: &CancelToken) -> idcanon::Result<()> {
    if cancel.is_cancelled() {
        return Err(IdcanonError::Cancelled);
    }
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("valid spinner template"),
    );
    progress.enable_steady_tick(Duration::from_millis(80));
    progress.set_message(message.to_string());
    progress
}
