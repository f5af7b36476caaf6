// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use env_logger::Target;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use structopt::clap::AppSettings;
use structopt::StructOpt;

use topomatch::{
    Error, MappingInputs, MappingStrategy, Metric, Numbering, PipelineConfiguration,
    TopologyFormat, TopologySource, VerboseSink, Verbosity,
};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "mapping",
    about = "Maps communicating processes onto the leaves of a hardware topology",
    setting = AppSettings::DisableHelpFlags,
    setting = AppSettings::DisableVersion
)]
pub struct Arguments {
    /// topology file, tleaf format
    #[structopt(short = "t", parse(from_os_str), conflicts_with = "xml")]
    pub tgt: Option<PathBuf>,
    /// topology file, hwloc XML format
    #[structopt(short = "x", parse(from_os_str))]
    pub xml: Option<PathBuf>,
    /// communication pattern file
    #[structopt(short = "c", parse(from_os_str))]
    pub communication: Option<PathBuf>,
    /// binding constraint file
    #[structopt(short = "b", parse(from_os_str))]
    pub bindings: Option<PathBuf>,
    /// sparsification factor of the partitioner, clamped to [0, 1]
    #[structopt(short = "a", allow_hyphen_values = true)]
    pub sparse_factor: Option<f64>,
    /// thousands of groups above which bucket grouping is used
    #[structopt(short = "g")]
    pub bucket_threshold: Option<u64>,
    /// strategy for the leaves: 0 tree matching, 1 partitioner
    #[structopt(short = "l")]
    pub leaf_strategy: Option<MappingStrategy>,
    /// evaluation metric: 1 sum_com, 2 max_com, 3 hop_byte
    #[structopt(short = "m")]
    pub metric: Option<Metric>,
    /// oversubscription factor
    #[structopt(short = "o")]
    pub oversubscription: Option<usize>,
    /// maximum number of threads
    #[structopt(short = "p")]
    pub threads: Option<usize>,
    /// verbosity, 0 (silent) to 7
    #[structopt(short = "v")]
    pub verbosity: Option<u8>,
    /// file receiving the verbose output
    #[structopt(short = "f", parse(from_os_str))]
    pub verbose_file: Option<PathBuf>,
    #[structopt(short = "d")]
    pub no_optimization: bool,
    #[structopt(short = "e")]
    pub exhaustive: bool,
    #[structopt(short = "k")]
    pub greedy: bool,
    #[structopt(short = "n")]
    pub physical: bool,
    #[structopt(short = "s")]
    pub no_display: bool,
    #[structopt(short = "h")]
    pub help: bool,
    /// YAML configuration the other options override
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,
    /// write the outcome of the run as JSON
    #[structopt(long, parse(from_os_str))]
    pub report: Option<PathBuf>,
}

/// A fully resolved invocation.
#[derive(Debug)]
pub struct Job {
    pub inputs: MappingInputs,
    pub config: PipelineConfiguration,
    pub verbose_file: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

impl Arguments {
    /// Resolve the inputs and the configuration.
    ///
    /// Mandatory inputs are checked before any file is read.
    pub fn into_job(self) -> Result<Job, Error> {
        let topology = match (&self.tgt, &self.xml) {
            (Some(path), None) => TopologySource {
                path: path.clone(),
                format: TopologyFormat::Tgt,
            },
            (None, Some(path)) => TopologySource {
                path: path.clone(),
                format: TopologyFormat::Xml,
            },
            (Some(_), Some(_)) => {
                return Err(Error::Usage("-t and -x are mutually exclusive".into()))
            }
            (None, None) => return Err(Error::Usage("missing topology file (-t or -x)".into())),
        };
        let affinity = self
            .communication
            .clone()
            .ok_or_else(|| Error::Usage("missing communication pattern file (-c)".into()))?;

        let mut config = match &self.config {
            Some(path) => PipelineConfiguration::from_file(path)?,
            None => PipelineConfiguration::default(),
        };
        if let Some(factor) = self.sparse_factor {
            config.solver.set_sparse_factor(factor);
        }
        if let Some(threshold) = self.bucket_threshold {
            config.solver.bucket_grouping_threshold = threshold;
        }
        if let Some(strategy) = self.leaf_strategy {
            config.solver.strategy = strategy;
        }
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        if let Some(factor) = self.oversubscription {
            config.oversubscription = factor;
        }
        if let Some(threads) = self.threads {
            config.solver.max_threads = Some(threads);
        }
        if let Some(level) = self.verbosity {
            config.verbosity = Verbosity(level);
        }
        if self.no_optimization {
            config.optimize_topology = false;
        }
        if self.exhaustive {
            config.solver.force_exhaustive_search();
        }
        if self.greedy {
            config.solver.greedy = true;
        }
        if self.physical {
            config.solver.numbering = Numbering::Physical;
        }
        if self.no_display {
            config.display_solution = false;
        }

        Ok(Job {
            inputs: MappingInputs {
                topology,
                affinity,
                bindings: self.bindings,
            },
            config: config.validate()?,
            verbose_file: self.verbose_file,
            report: self.report,
        })
    }
}

pub fn usage() -> String {
    format!(
        "Usage: mapping\n\
         \t-t|x <filename> Architecture file [tgt|xml]\n\
         \t-c <filename> Communication pattern file\n\
         Options:\n\
         \t-a <threshold> number in [0,1]: the partitioner only considers the entries above max_val * threshold (default {:.1})\n\
         \t-b <filename> binding constraint file\n\
         \t-f <filename> file receiving the verbose messages\n\
         \t-g <threshold> thousands of groups above which bucket grouping is used (default {})\n\
         \t-l <strategy> strategy for the leaves (0: tree matching, 1: partitioner)\n\
         \t-m <metric> evaluation metric (1: sum_com (default), 2: max_com, 3: hop_byte)\n\
         \t-o <factor> oversubscription factor (default 1)\n\
         \t-p <threads> maximum number of threads in parallel sections (default: number of cores)\n\
         \t-v <level> verbosity, from 0 (disabled) to 7 (default 2)\n\
         \t--config <filename> YAML configuration, overridden by the options\n\
         \t--report <filename> write the outcome as JSON\n\
         Flags:\n\
         \t-d disable topology optimization\n\
         \t-e force exhaustive search\n\
         \t-k force greedy k-partitioning\n\
         \t-n physical numbering (XML topologies)\n\
         \t-s do not display the solution (timings are still reported with -v 4)\n\
         \t-h display this help\n",
        topomatch::SPARSE_FACTOR,
        topomatch::BUCKET_GROUPING_THRESHOLD
    )
}

/// Set up logging and run the pipeline.
pub fn execute(job: Job) -> anyhow::Result<()> {
    let verbosity = job.config.verbosity;
    let mut logger = env_logger::builder();
    logger.filter(None, verbosity.log_filter());
    let verbose: Box<dyn io::Write> = match &job.verbose_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            logger.target(Target::Pipe(Box::new(file.try_clone()?)));
            Box::new(file)
        }
        None => {
            logger.target(Target::Stderr);
            Box::new(io::stdout())
        }
    };
    let _logger = logger.try_init();

    let mut sink = VerboseSink::new(verbosity, verbose, Box::new(io::stdout()));
    let outcome = topomatch::run(&job.inputs, &job.config, &mut sink)?;
    log::info!("mapped with the {} strategy", outcome.strategy);

    if let Some(path) = &job.report {
        let file =
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &outcome)
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Arguments, structopt::clap::Error> {
        Arguments::from_iter_safe(std::iter::once("mapping").chain(args.iter().copied()))
    }

    #[test]
    fn flags_map_to_the_configuration() {
        let job = parse(&[
            "-t", "arch.tgt", "-c", "com.mat", "-o", "2", "-m", "3", "-p", "4", "-v", "9", "-d",
            "-s", "-k", "-l", "1",
        ])
        .unwrap()
        .into_job()
        .unwrap();
        assert_eq!(job.inputs.topology.format, TopologyFormat::Tgt);
        assert_eq!(job.inputs.affinity, PathBuf::from("com.mat"));
        assert_eq!(job.config.oversubscription, 2);
        assert_eq!(job.config.metric, Metric::HopByte);
        assert_eq!(job.config.solver.max_threads, Some(4));
        assert_eq!(job.config.verbosity, Verbosity::EXTRA);
        assert!(!job.config.optimize_topology);
        assert!(!job.config.display_solution);
        assert!(job.config.solver.greedy);
        assert_eq!(job.config.solver.strategy, MappingStrategy::Partitioner);
    }

    #[test]
    fn defaults() {
        let job = parse(&["-x", "arch.xml", "-c", "com.mat"])
            .unwrap()
            .into_job()
            .unwrap();
        assert_eq!(job.inputs.topology.format, TopologyFormat::Xml);
        assert_eq!(job.config, PipelineConfiguration::default());
    }

    #[test]
    fn sparse_factor_accepts_negative_values() {
        let low = parse(&["-t", "a", "-c", "c", "-a", "-0.5"]).unwrap();
        assert_eq!(low.into_job().unwrap().config.solver.sparse_factor, 0.0);
        let high = parse(&["-t", "a", "-c", "c", "-a", "1.5"]).unwrap();
        assert_eq!(high.into_job().unwrap().config.solver.sparse_factor, 1.0);
    }

    #[test]
    fn exhaustive_search_disables_bucket_grouping() {
        let job = parse(&["-t", "a", "-c", "c", "-e", "-g", "1"])
            .unwrap()
            .into_job()
            .unwrap();
        assert!(job.config.solver.exhaustive_search);
        assert_eq!(job.config.solver.bucket_grouping_threshold, u64::MAX);
    }

    #[test]
    fn usage_errors() {
        assert!(matches!(
            parse(&["-c", "c"]).unwrap().into_job(),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            parse(&["-t", "a"]).unwrap().into_job(),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            parse(&["-t", "a", "-c", "c", "-o", "0"]).unwrap().into_job(),
            Err(Error::Usage(_))
        ));
        assert!(parse(&["-t", "a", "-x", "b", "-c", "c"]).is_err());
        assert!(parse(&["-t", "a", "-c", "c", "-m", "4"]).is_err());
        assert!(parse(&["-t", "a", "-c", "c", "-l", "2"]).is_err());
        assert!(parse(&["-q"]).is_err());
        assert!(parse(&["-h"]).unwrap().help);
    }

    #[test]
    fn configuration_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        std::fs::write(&path, "metric: max_com\noversubscription: 3\nsolver:\n  greedy: true\n")
            .unwrap();
        let job = parse(&["-t", "a", "-c", "c", "-o", "2", "--config", path.to_str().unwrap()])
            .unwrap()
            .into_job()
            .unwrap();
        assert_eq!(job.config.metric, Metric::MaxCom);
        assert_eq!(job.config.oversubscription, 2);
        assert!(job.config.solver.greedy);
    }
}
