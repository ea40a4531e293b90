use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "daycast", about = "discrete choice simulation for activity-based travel demand")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// simulate (or record estimation data for) one choice model over a
    /// population of decision makers
    Run {
        /// path to the TOML run configuration
        #[arg(short, long)]
        config: String,
    },
    /// build a rank-sorted destination sampling frame from parcel and zone
    /// weight tables
    BuildFrame {
        /// CSV of parcels: parcel_id, zone, size
        #[arg(long)]
        parcels: String,
        /// CSV of zone-to-zone weights: origin, destination, weight
        #[arg(long)]
        weights: String,
        /// output path for the binary frame artifact
        #[arg(short, long)]
        output: String,
    },
}
