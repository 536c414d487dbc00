use super::{Inputs, print_parameters};
use crate::cli::OptimizeArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::io;
use crate::utils::progress::CliProgressHandler;
use phylolik::engine::progress::ProgressReporter;
use phylolik::workflows;
use tracing::info;

pub fn run(args: OptimizeArgs, progress_handler: &CliProgressHandler) -> Result<()> {
    let config = PartialConfig::load(&args.model)?;
    info!("Merging configuration from file and CLI arguments...");
    let optimization = config.optimization_config(&args)?;
    let inputs = Inputs::load(&args.model, &config)?;
    let tree = io::read_tree(&args.tree)?;
    let mut likelihood = inputs.into_likelihood(tree)?;

    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting parameter optimization...");
    info!("Invoking the core optimization workflow...");
    let report = workflows::optimize::optimize_parameters(&mut likelihood, &optimization, &reporter)?;

    info!(
        initial = report.initial_log_likelihood,
        log_likelihood = report.log_likelihood,
        evaluations = report.evaluations,
        "Workflow finished."
    );
    println!(
        "Log likelihood: {:.6} (initial {:.6})",
        report.log_likelihood, report.initial_log_likelihood
    );
    if let Some(topology) = &report.topology {
        println!(
            "Topology search: {} NNI move(s) accepted out of {} tested",
            topology.accepted, topology.tested
        );
    }
    print_parameters(&likelihood);

    io::write_tree(&args.output, likelihood.tree())?;
    println!("✓ Optimized tree written to: {}", args.output.display());
    if let Some(path) = &args.report {
        io::write_parameter_report(path, &likelihood, &report)?;
        println!("✓ Parameter report written to: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::commands::tests::write_inputs;
    use clap::Parser;
    use phylolik::core::tree::{parse_newick, robinson_foulds_distance};
    use std::fs;
    use tempfile::tempdir;

    fn run_with(extra: &[&str]) -> (toml::Table, String) {
        let dir = tempdir().unwrap();
        let (sequences, tree) = write_inputs(dir.path());
        let output = dir.path().join("out.dnd");
        let report = dir.path().join("report.toml");
        let mut argv = vec![
            "phylolik".to_string(),
            "optimize".to_string(),
            "-s".to_string(),
            sequences.to_str().unwrap().to_string(),
            "-t".to_string(),
            tree.to_str().unwrap().to_string(),
            "-o".to_string(),
            output.to_str().unwrap().to_string(),
            "--report".to_string(),
            report.to_str().unwrap().to_string(),
            "--nan-dump".to_string(),
            dir.path().join("DEBUG.LOG").to_str().unwrap().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        let Commands::Optimize(args) = Cli::parse_from(argv).command else {
            panic!("Expected 'optimize' subcommand");
        };
        run(args, &CliProgressHandler::hidden()).unwrap();
        let report: toml::Table = toml::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        (report, fs::read_to_string(&output).unwrap())
    }

    #[test]
    fn optimization_improves_the_likelihood_and_writes_outputs() {
        let (report, newick) = run_with(&["-m", "K80", "--tolerance", "1e-4"]);
        let initial = report["initial_log_likelihood"].as_float().unwrap();
        let last = report["log_likelihood"].as_float().unwrap();
        assert!(last > initial);
        assert!(report["parameters"].as_table().unwrap().contains_key("kappa"));
        assert!(parse_newick(newick.trim()).is_ok());
    }

    #[test]
    fn nni_search_reports_moves_and_fixes_the_topology() {
        let (report, newick) = run_with(&["-m", "K80", "--nni", "better", "-S", "optimization.topology.tolerance.during=0.01"]);
        assert!(report["nni_moves"].as_integer().unwrap() >= 1);
        let initial = report["initial_log_likelihood"].as_float().unwrap();
        assert!(report["log_likelihood"].as_float().unwrap() > initial);
        let start = parse_newick("((A,D),C,(B,E));").unwrap();
        let tree = parse_newick(newick.trim()).unwrap();
        assert!(robinson_foulds_distance(&start, &tree).unwrap() > 0);
    }
}
