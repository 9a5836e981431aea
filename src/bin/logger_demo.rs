use workdesk::logger::*;

fn main() -> anyhow::Result<()> {
    let logger = Logger::new_bootstrap();
    trace!("bootstrap trace log");
    debug!("bootstrap debug log");
    info!(filter = %logger.current_filter()?, "bootstrap info log");

    let config = LogConfig {
        filter: "workdesk=trace,debug".to_string(),
    };
    logger.reload_from_config(&config)?;
    trace!("client trace log");
    debug!("client debug log");
    info!(filter = %logger.current_filter()?, "client info log");

    let bad = LogConfig {
        filter: "workdesk=[".to_string(),
    };
    if let Err(e) = logger.reload_from_config(&bad) {
        warn!(error = %e, "rejected filter, keeping the previous one");
    }

    Ok(())
}
