use std::path::Path;

use clap::Parser;
use daycast::app::cli::{CliArgs, Command};
use daycast::app::config::AppConfig;
use daycast::app::{frame, runner, AppError};
use daycast::model::ModelRegistry;

fn main() {
    env_logger::init();

    let args = CliArgs::parse();
    if let Err(e) = dispatch(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn dispatch(args: CliArgs) -> Result<(), AppError> {
    match args.command {
        Command::Run { config } => {
            let config = AppConfig::from_file(Path::new(&config))?;
            log::debug!(
                "configuration: {}",
                serde_json::to_string(&config).unwrap_or_default()
            );
            let registry = ModelRegistry::with_builtin_models();
            let summary = runner::run(&config, &registry)?;
            log::info!(
                "run complete: {} decision makers on {} lane(s), {} choices simulated, {} without an available alternative",
                summary.decision_makers,
                summary.lanes,
                summary.simulated_choices,
                summary.no_choice,
            );
            Ok(())
        }
        Command::BuildFrame {
            parcels,
            weights,
            output,
        } => {
            frame::build_frame(
                Path::new(&parcels),
                Path::new(&weights),
                Path::new(&output),
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use daycast::app::config::AppConfig;
    use daycast::app::{frame, runner};
    use daycast::model::ModelRegistry;

    const COEFFICIENTS: &str = "\
End-to-end destination model
END
  1 AdjFactor    C  1.0000
  2 LogAttr      F  0.8000
 51 GammaBase    T  0.0000
 90 LSM_Dest     F  0.7000
-1
";

    const PARCELS: &str = "\
parcel_id,zone,size
11,0,30.0
12,0,10.0
13,0,1.0
21,1,6.0
22,1,4.0
23,1,1.0
";

    const WEIGHTS: &str = "\
origin,destination,weight
0,0,2.0
0,1,8.0
1,0,7.0
1,1,3.0
";

    fn stage(dir: &Path) -> AppConfig {
        std::fs::write(dir.join("model.f12"), COEFFICIENTS).expect("coefficients");
        std::fs::write(dir.join("parcels.csv"), PARCELS).expect("parcels");
        std::fs::write(dir.join("weights.csv"), WEIGHTS).expect("weights");

        frame::build_frame(
            &dir.join("parcels.csv"),
            &dir.join("weights.csv"),
            &dir.join("frame.bin"),
        )
        .expect("frame");

        let config = format!(
            r#"
model = "destination"
coefficients_file = "{}"
frame_file = "{}"
decision_makers = 40
sample_size = 10
lanes = 4
random_seed = 7
"#,
            dir.join("model.f12").display(),
            dir.join("frame.bin").display(),
        );
        std::fs::write(dir.join("run.toml"), config).expect("config");

        AppConfig::from_file(&dir.join("run.toml")).expect("parse config")
    }

    #[test]
    fn test_e2e_simulation_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = stage(dir.path());
        let registry = ModelRegistry::with_builtin_models();

        let summary = runner::run(&config, &registry).expect("run");
        assert_eq!(summary.decision_makers, 40);
        assert_eq!(summary.lanes, 4);
        assert_eq!(summary.simulated_choices + summary.no_choice, 40);
        assert_eq!(
            summary.no_choice, 0,
            "every zone offers at least one drawable destination"
        );
    }

    #[test]
    fn test_e2e_estimation_run_emits_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = stage(dir.path());
        config.estimation = Some(daycast::app::config::EstimationConfig {
            data_file: dir.path().join("model.dat").display().to_string(),
            control_file: dir.path().join("model.alo").display().to_string(),
        });

        let registry = ModelRegistry::with_builtin_models();
        let summary = runner::run(&config, &registry).expect("run");

        // estimation forces a single lane and records rows instead of choices
        assert_eq!(summary.lanes, 1);
        assert_eq!(summary.simulated_choices, 0);
        assert_eq!(
            summary.accepted_observations + summary.rejected_observations,
            40
        );

        let data = std::fs::read_to_string(dir.path().join("model.dat")).expect("data file");
        assert_eq!(data.lines().count(), summary.accepted_observations);

        let control = std::fs::read_to_string(dir.path().join("model.alo")).expect("control file");
        assert!(control.starts_with("$TITLE End-to-end destination model"));
        assert!(control.contains("choice = DD("));
        assert!(control.contains("$L_S_M 90"));
    }
}
