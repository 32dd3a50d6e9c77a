//! Build pipeline: locate -> fetch -> expand -> parse -> resolve -> assemble
//!
//! Per-candidate work runs concurrently up to `settings.concurrency`. Each
//! result lands in the arena slot of its ordinal (backend order, then key
//! order) and a single-threaded reduction feeds the graph builder, so the
//! serialized graph does not depend on completion order.

use crate::check::CheckReport;
use futures::stream::{self, StreamExt};
use serde_json::json;
use stairlight_core::{
    find_config_file, key_stem, Config, ConfigError, Diagnostic, DiagnosticCode, Location,
    MappingConfig, MappingTable, Report, Settings, Severity, SourceUnit,
};
use stairlight_graph::{DependencyGraph, GraphBuilder, Provenance, UpstreamInput};
use stairlight_source::{Candidate, Locator, SourceAccessError};
use stairlight_sql::{MappingResolver, ParseWarning, ParsedSql, ReferenceParser, Resolution};
use stairlight_template::params::{all_params, nested_skeleton};
use stairlight_template::{TemplateExpander, TemplateExpansionError};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Fatal pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source access failed: {0}")]
    Source(#[from] SourceAccessError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            BuildError::Source(error) => {
                let diagnostic = Diagnostic::new(
                    DiagnosticCode::SourceAccessFailed,
                    Severity::Error,
                    self.to_string(),
                );
                match error.path() {
                    Some(path) => diagnostic.with_location(Location::new(path)),
                    None => diagnostic,
                }
            }
            BuildError::Config(_) => {
                Diagnostic::new(DiagnosticCode::ConfigInvalid, Severity::Error, self.to_string())
            }
        }
    }
}

/// Everything one build produces
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: DependencyGraph,
    pub check: CheckReport,
    pub report: Report,
}

/// Result of one expanded unit
#[derive(Debug)]
enum UnitOutcome {
    Resolved {
        set_index: Option<usize>,
        unit: SourceUnit,
        resolution: Resolution,
        parse_warning: Option<ParseWarning>,
    },
    Failed {
        set_index: Option<usize>,
        error: TemplateExpansionError,
    },
}

/// Result of one located candidate
#[derive(Debug)]
struct CandidateOutcome {
    /// Index of the mapping entry describing the candidate
    entry: Option<usize>,

    /// Placeholders found in the raw text
    placeholders: Vec<String>,

    units: Vec<UnitOutcome>,
}

/// Load the mapping file
///
/// An explicit path must exist. Otherwise `<mapping_prefix>.{toml,yaml,yml}`
/// is looked up in the project root; without one every unit is unmapped.
pub fn load_mapping(config: &Config, explicit: Option<&Path>) -> Result<MappingConfig, ConfigError> {
    if let Some(path) = explicit {
        return MappingConfig::from_file(path);
    }
    match find_config_file(&config.project_root, &config.settings.mapping_prefix) {
        Some(path) => {
            debug!("mapping file: {}", path.display());
            MappingConfig::from_file(&path)
        }
        None => {
            warn!(
                "no {}.{{toml,yaml,yml}} in {}, every source is unmapped",
                config.settings.mapping_prefix,
                config.project_root.display()
            );
            Ok(MappingConfig::default())
        }
    }
}

/// One lineage build over a fixed set of backends and mapping
pub struct Pipeline {
    locators: Vec<Locator>,
    mapping: MappingConfig,
    settings: Settings,
    expander: TemplateExpander,
    parser: ReferenceParser,
}

impl Pipeline {
    pub fn new(locators: Vec<Locator>, mapping: MappingConfig, settings: Settings) -> Self {
        Self {
            locators,
            mapping,
            settings,
            expander: TemplateExpander::new(),
            parser: ReferenceParser::new(),
        }
    }

    /// Pipeline over every backend in `config.include`, in order
    pub fn from_config(config: &Config, mapping: MappingConfig) -> Result<Self, BuildError> {
        config.validate()?;
        mapping.validate()?;
        let locators = config
            .include
            .iter()
            .map(|descriptor| Locator::from_descriptor(descriptor, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(locators, mapping, config.settings.clone()))
    }

    /// Run the whole pipeline
    ///
    /// Listing or fetch failures (after retries) abort the run. Template and
    /// parse problems are reported per unit and the run continues.
    pub async fn build(&self) -> Result<BuildOutput, BuildError> {
        let mut work: Vec<(&Locator, Candidate)> = Vec::new();
        for locator in &self.locators {
            let candidates = locator.locate().await?;
            work.extend(candidates.map(|candidate| (locator, candidate)));
        }
        info!("{} source(s) located on {} backend(s)", work.len(), self.locators.len());

        let results = stream::iter(work.iter().enumerate())
            .map(|(ordinal, (locator, candidate))| async move {
                (ordinal, self.process(locator, candidate).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut arena: Vec<Option<Result<CandidateOutcome, SourceAccessError>>> =
            (0..work.len()).map(|_| None).collect();
        for (ordinal, outcome) in results {
            arena[ordinal] = Some(outcome);
        }

        let mut builder = GraphBuilder::new();
        let mut check = CheckReport::new();
        let mut report = Report::new();
        let mut matched: HashSet<usize> = HashSet::new();
        let mut produced: HashSet<(usize, usize)> = HashSet::new();

        for ((_, candidate), slot) in work.iter().zip(arena) {
            let Some(outcome) = slot else {
                continue;
            };
            let outcome = outcome?;

            if let Some(entry) = outcome.entry {
                matched.insert(entry);
            }
            let tables = self.tables_of(outcome.entry);

            for unit_outcome in outcome.units {
                match unit_outcome {
                    UnitOutcome::Resolved {
                        set_index,
                        unit,
                        resolution,
                        parse_warning,
                    } => {
                        if let Some(warning) = parse_warning {
                            report.add_diagnostic(warning.to_diagnostic(&unit.key, &unit.uri));
                        }
                        let table = set_index.and_then(|idx| tables.get(idx));
                        match (table, outcome.entry, set_index) {
                            (Some(table), Some(entry), Some(idx)) => {
                                produced.insert((entry, idx));
                                match &resolution.output {
                                    Some(output) => self.assemble(&mut builder, &unit, output, table, &resolution),
                                    None => {
                                        let name = resolution.incomplete_output.as_deref().unwrap_or(&table.table_name);
                                        warn!("{}: output table '{}' is not fully qualified", unit.key, name);
                                        report.add_diagnostic(
                                            Diagnostic::new(
                                                DiagnosticCode::MappingIncompleteTable,
                                                Severity::Warn,
                                                format!("Output table '{}' is not fully qualified; unit left out of the graph", name),
                                            )
                                            .with_location(Location::new(&unit.key).and_uri(&unit.uri))
                                            .with_table(name),
                                        );
                                    }
                                }
                            }
                            _ => check.add_skeleton(
                                &unit.kind,
                                &unit.key,
                                unit.stem(),
                                nested_skeleton(&outcome.placeholders),
                            ),
                        }
                        self.report_resolution(
                            &mut report,
                            &mut check,
                            &unit,
                            table.map(|t| t.table_name.as_str()),
                            &resolution,
                        );
                    }
                    UnitOutcome::Failed { set_index, error } => {
                        warn!("{}: {}", candidate.key, error);
                        report.add_diagnostic(error.to_diagnostic(&candidate.key, &candidate.uri));
                        match &error {
                            TemplateExpansionError::UnmappedTemplate { params } => check.add_skeleton(
                                &candidate.kind,
                                &candidate.key,
                                key_stem(&candidate.key),
                                nested_skeleton(params),
                            ),
                            TemplateExpansionError::MissingParameters { table_name, params } => {
                                check.add_skeleton(
                                    &candidate.kind,
                                    &candidate.key,
                                    table_name,
                                    nested_skeleton(params),
                                )
                            }
                            TemplateExpansionError::RenderError { .. } => {
                                debug!("{}: set {:?} excluded", candidate.key, set_index);
                            }
                        }
                    }
                }
            }
        }

        self.report_dead_entries(&mut report, &matched, &produced);

        let units_built = builder.unit_count();
        let graph = builder.finish();

        report.summary.sources_located = work.len();
        report.summary.units_built = units_built;
        report.summary.edges = graph.edge_count();
        report.metadata = Some(json!({
            "graph_sha256": graph.digest().ok(),
            "backends": self
                .locators
                .iter()
                .map(|locator| locator.backend().identifier())
                .collect::<Vec<_>>(),
        }));

        info!(
            "graph built: {} unit(s), {} table(s), {} edge(s)",
            units_built,
            graph.tables().len(),
            graph.edge_count()
        );

        Ok(BuildOutput { graph, check, report })
    }

    /// Fetch, expand, parse and resolve one candidate
    async fn process(&self, locator: &Locator, candidate: &Candidate) -> Result<CandidateOutcome, SourceAccessError> {
        let text = locator.fetch(candidate).await?;
        let entry = self
            .mapping
            .find_entry(&candidate.kind, &candidate.key, &candidate.uri)
            .map(|(idx, _)| idx);
        let tables = self.tables_of(entry);
        let resolver = MappingResolver::new(&candidate.context);

        let units = self
            .expander
            .expand(&text, tables, &self.mapping.global.parameters)
            .into_iter()
            .enumerate()
            .map(|(position, expansion)| match expansion {
                Ok(expanded) => {
                    let unit = SourceUnit {
                        kind: candidate.kind.clone(),
                        key: candidate.key.clone(),
                        uri: candidate.uri.clone(),
                        bucket: candidate.bucket.clone(),
                        params: expanded.params,
                        text: expanded.text,
                        context: candidate.context.clone(),
                    };
                    let (parsed, parse_warning) = match self.parser.parse(&unit.text) {
                        Ok(parsed) => (parsed, None),
                        Err(warning) => (ParsedSql::default(), Some(warning)),
                    };
                    let resolution = resolver.resolve(
                        &parsed,
                        expanded.set_index.and_then(|idx| tables.get(idx)),
                    );
                    UnitOutcome::Resolved {
                        set_index: expanded.set_index,
                        unit,
                        resolution,
                        parse_warning,
                    }
                }
                Err(error) => UnitOutcome::Failed {
                    set_index: (!tables.is_empty()).then_some(position),
                    error,
                },
            })
            .collect();

        Ok(CandidateOutcome {
            entry,
            placeholders: all_params(&text),
            units,
        })
    }

    fn tables_of(&self, entry: Option<usize>) -> &[MappingTable] {
        entry
            .and_then(|idx| self.mapping.mapping.get(idx))
            .map(|entry| entry.tables.as_slice())
            .unwrap_or(&[])
    }

    /// Add a mapped unit's references as edges
    fn assemble(
        &self,
        builder: &mut GraphBuilder,
        unit: &SourceUnit,
        output: &str,
        table: &MappingTable,
        resolution: &Resolution,
    ) {
        let inputs: Vec<UpstreamInput> = resolution
            .references
            .iter()
            .map(|reference| {
                let mut labels = table.labels.clone();
                labels.extend(self.mapping.extra_labels_for(&reference.table));
                UpstreamInput {
                    table: reference.table.clone(),
                    line: reference.line,
                    line_str: reference.line_str.clone(),
                    labels,
                }
            })
            .collect();
        builder.add_unit(output, &Provenance::from_unit(unit), &inputs);
    }

    fn report_resolution(
        &self,
        report: &mut Report,
        check: &mut CheckReport,
        unit: &SourceUnit,
        table_name: Option<&str>,
        resolution: &Resolution,
    ) {
        for undefined in &resolution.undefined {
            check.add_undefined(&unit.kind, &unit.key, &unit.uri, table_name, undefined);

            let location = match undefined.line {
                Some(line) => Location::with_line(&unit.key, line),
                None => Location::new(&unit.key),
            };
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::MappingUndefinedReference,
                    Severity::Warn,
                    format!("Undefined reference to {} ({:?})", undefined.table, undefined.reason),
                )
                .with_location(location.and_uri(&unit.uri))
                .with_table(undefined.table.clone()),
            );
        }

        if let (Some(target), Some(table_name)) = (&resolution.target_mismatch, table_name) {
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::MappingTargetMismatch,
                    Severity::Info,
                    format!("SQL writes {} but the mapping declares {}", target, table_name),
                )
                .with_location(Location::new(&unit.key).and_uri(&unit.uri))
                .with_table(table_name),
            );
        }
    }

    fn report_dead_entries(&self, report: &mut Report, matched: &HashSet<usize>, produced: &HashSet<(usize, usize)>) {
        for (idx, entry) in self.mapping.mapping.iter().enumerate() {
            if !matched.contains(&idx) {
                warn!("mapping entry {} matches no located source", entry.selector());
                report.add_diagnostic(Diagnostic::new(
                    DiagnosticCode::MappingDeadEntry,
                    Severity::Warn,
                    format!("Mapping entry {} matches no located source", entry.selector()),
                ));
                continue;
            }
            for (set, table) in entry.tables.iter().enumerate() {
                if !produced.contains(&(idx, set)) {
                    report.add_diagnostic(
                        Diagnostic::new(
                            DiagnosticCode::MappingDeadEntry,
                            Severity::Warn,
                            format!("{} is never produced by {}", table.table_name, entry.selector()),
                        )
                        .with_table(table.table_name.clone()),
                    );
                }
            }
        }
    }
}
