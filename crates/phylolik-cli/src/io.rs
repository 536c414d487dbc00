//! File formats read and written by the command-line tool.

use crate::error::{CliError, Result};
use anyhow::{Context, bail};
use phylolik::core::alphabet::Alphabet;
use phylolik::core::data::Alignment;
use phylolik::core::tree::{Tree, parse_newick, to_newick};
use phylolik::engine::function::Function;
use phylolik::engine::likelihood::PhyloLikelihood;
use phylolik::workflows::optimize::OptimizationReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Parses aligned sequences in FASTA format.
///
/// The name of a sequence is the first word of its header line. Sequence
/// lines may wrap; whitespace inside them is ignored.
pub fn parse_fasta(text: &str, alphabet: Alphabet) -> anyhow::Result<Alignment> {
    let mut alignment = Alignment::new(alphabet);
    let mut current: Option<(String, String)> = None;
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            if let Some((name, sequence)) = current.take() {
                alignment.add_sequence(name, &sequence)?;
            }
            let name = header.split_whitespace().next().unwrap_or_default();
            if name.is_empty() {
                bail!("empty sequence name on line {}", number + 1);
            }
            current = Some((name.to_string(), String::new()));
        } else {
            match current.as_mut() {
                Some((_, sequence)) => sequence.push_str(line),
                None => bail!("sequence data before the first header on line {}", number + 1),
            }
        }
    }
    if let Some((name, sequence)) = current {
        alignment.add_sequence(name, &sequence)?;
    }
    if alignment.number_of_sequences() == 0 {
        bail!("no sequence found");
    }
    Ok(alignment)
}

pub fn read_fasta(path: &Path, alphabet: Alphabet) -> Result<Alignment> {
    let text = std::fs::read_to_string(path)?;
    let alignment = parse_fasta(&text, alphabet).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!(
        sequences = alignment.number_of_sequences(),
        sites = alignment.number_of_sites(),
        "Loaded alignment from {:?}",
        path
    );
    Ok(alignment)
}

pub fn read_tree(path: &Path) -> Result<Tree> {
    let text = std::fs::read_to_string(path)?;
    let tree = parse_newick(text.trim()).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    debug!(leaves = tree.leaf_names().len(), "Loaded tree from {:?}", path);
    Ok(tree)
}

pub fn write_tree(path: &Path, tree: &Tree) -> Result<()> {
    std::fs::write(path, format!("{}\n", to_newick(tree)))?;
    info!("Wrote tree to {:?}", path);
    Ok(())
}

#[derive(Serialize)]
struct SiteRecord {
    site: usize,
    log_likelihood: f64,
    rate_class: usize,
    posterior_rate: f64,
}

/// Writes one CSV row per alignment site, numbered from 1.
pub fn write_site_likelihoods(path: &Path, likelihood: &PhyloLikelihood) -> Result<()> {
    let to_error = |e: csv::Error| CliError::FileWriting {
        path: path.to_path_buf(),
        source: e.into(),
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_error)?;
    let log_likelihoods = likelihood.log_likelihood_for_each_site();
    let classes = likelihood.class_with_max_post_prob_of_each_site();
    let rates = likelihood.posterior_rate_of_each_site();
    for (i, ((&log_likelihood, &rate_class), &posterior_rate)) in
        log_likelihoods.iter().zip(&classes).zip(&rates).enumerate()
    {
        writer
            .serialize(SiteRecord {
                site: i + 1,
                log_likelihood,
                rate_class,
                posterior_rate,
            })
            .map_err(to_error)?;
    }
    writer.flush()?;
    info!(sites = log_likelihoods.len(), "Wrote per-site likelihoods to {:?}", path);
    Ok(())
}

#[derive(Serialize)]
struct ParameterReport {
    initial_log_likelihood: f64,
    log_likelihood: f64,
    evaluations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    nni_moves: Option<usize>,
    parameters: BTreeMap<String, f64>,
}

/// Writes the log-likelihoods and every parameter value as TOML.
pub fn write_parameter_report(path: &Path, likelihood: &PhyloLikelihood, report: &OptimizationReport) -> Result<()> {
    let document = ParameterReport {
        initial_log_likelihood: report.initial_log_likelihood,
        log_likelihood: report.log_likelihood,
        evaluations: report.evaluations,
        nni_moves: report.topology.as_ref().map(|t| t.accepted),
        parameters: likelihood
            .parameters()
            .iter()
            .map(|p| (p.name().to_string(), p.value()))
            .collect(),
    };
    let text = toml::to_string(&document)
        .context("serializing the parameter report")
        .map_err(|e| CliError::FileWriting {
            path: path.to_path_buf(),
            source: e,
        })?;
    std::fs::write(path, text)?;
    info!("Wrote parameter report to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylolik::core::models::{ConstantDistribution, NucleotideModel, NucleotideModelKind};
    use std::fs;
    use tempfile::tempdir;

    const FASTA: &str = ">A first sequence\nACGTAC\nGTAC\n>B\nACGTACGTAA\n\n>C\nACGAACG-AC\n";

    fn likelihood() -> PhyloLikelihood {
        let alignment = parse_fasta(FASTA, Alphabet::Dna).unwrap();
        let tree = parse_newick("(A:0.1,B:0.2,C:0.3);").unwrap();
        PhyloLikelihood::homogeneous(
            tree,
            alignment,
            Box::new(NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna)),
            Box::new(ConstantDistribution::new()),
        )
        .unwrap()
    }

    #[test]
    fn fasta_with_wrapped_lines_and_descriptions_is_parsed() {
        let alignment = parse_fasta(FASTA, Alphabet::Dna).unwrap();
        assert_eq!(alignment.names(), vec!["A", "B", "C"]);
        assert_eq!(alignment.number_of_sites(), 10);
        assert_eq!(alignment.text("A"), Some("ACGTACGTAC"));
    }

    #[test]
    fn malformed_fasta_is_rejected() {
        assert!(parse_fasta("ACGT\n>A\nACGT\n", Alphabet::Dna).is_err());
        assert!(parse_fasta(">A\nACGT\n>B\nACG\n", Alphabet::Dna).is_err());
        assert!(parse_fasta(">A\nACGZ\n", Alphabet::Dna).is_err());
        assert!(parse_fasta("", Alphabet::Dna).is_err());
    }

    #[test]
    fn read_errors_carry_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.dnd");
        fs::write(&path, "((A,B);").unwrap();
        let result = read_tree(&path);
        assert!(matches!(result, Err(CliError::FileParsing { path: p, .. }) if p == path));
    }

    #[test]
    fn tree_written_to_disk_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.dnd");
        let tree = parse_newick("((A:0.1,B:0.2):0.05,C:0.3);").unwrap();
        write_tree(&path, &tree).unwrap();
        let back = read_tree(&path).unwrap();
        assert_eq!(to_newick(&back), to_newick(&tree));
    }

    #[test]
    fn per_site_csv_has_one_row_per_site() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sites.csv");
        let lik = likelihood();
        write_site_likelihoods(&path, &lik).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["site", "log_likelihood", "rate_class", "posterior_rate"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 10);
        let total: f64 = rows.iter().map(|r| r[1].parse::<f64>().unwrap()).sum();
        assert!((total - lik.log_likelihood()).abs() < 1e-8);
    }

    #[test]
    fn parameter_report_lists_every_parameter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.toml");
        let lik = likelihood();
        let report = OptimizationReport {
            initial_log_likelihood: lik.log_likelihood(),
            log_likelihood: lik.log_likelihood(),
            evaluations: 0,
            topology: None,
        };
        write_parameter_report(&path, &lik, &report).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: toml::Table = toml::from_str(&text).unwrap();
        let parameters = value["parameters"].as_table().unwrap();
        assert_eq!(parameters.len(), lik.parameters().len());
        assert_eq!(parameters["kappa"].as_float(), Some(2.0));
        assert!(!value.contains_key("nni_moves"));
    }
}
