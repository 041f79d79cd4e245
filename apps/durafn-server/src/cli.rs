use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "durafn-server",
    about = "Durafn demo server",
    version,
    long_about = "Serves a small set of durable demo functions for an Executor \
                  to drive: sequential steps, parallel steps, sleeps, and a \
                  failure handler."
)]
pub struct Args {
    /// HTTP port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// App ID used to namespace function IDs
    #[arg(long, env = "DURAFN_APP_ID", default_value = "durafn-demo")]
    pub app_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}
