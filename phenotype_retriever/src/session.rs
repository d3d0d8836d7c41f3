// src/session.rs

use std::fmt;
use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::api_handler::DataService;
use crate::error::{PipelineError, Result};
use crate::models::PhenotypeSelection;
use crate::pipeline::{Analysis, Pipeline};
use crate::selection::PhenotypeCatalog;

/// The gene and phenotype term a session settled on.
#[derive(Debug, Clone)]
pub struct Choice {
    pub catalog: PhenotypeCatalog,
    pub term: String,
    pub selection: PhenotypeSelection,
}

/// Interactive gene and term selection. Recoverable failures send the user
/// back to the matching prompt instead of ending the session.
pub struct Session<'p, S: DataService, R, W> {
    pipeline: &'p Pipeline<S>,
    input: R,
    output: W,
    gene: Option<String>,
    term: Option<String>,
}

/// Anything but an explicit "n"/"no" accepts.
pub fn wants_to_proceed(answer: &str) -> bool {
    !matches!(answer.trim().to_lowercase().as_str(), "n" | "no")
}

impl<'p, S, R, W> Session<'p, S, R, W>
where
    S: DataService,
    R: BufRead,
    W: Write,
{
    pub fn new(pipeline: &'p Pipeline<S>, input: R, output: W) -> Self {
        Session {
            pipeline,
            input,
            output,
            gene: None,
            term: None,
        }
    }

    /// Symbol tried before the first prompt. It is taken as confirmed.
    pub fn with_gene(mut self, gene: Option<String>) -> Self {
        self.gene = gene;
        self
    }

    /// Term tried before the first term prompt.
    pub fn with_term(mut self, term: Option<String>) -> Self {
        self.term = term;
        self
    }

    fn say(&mut self, line: impl fmt::Display) -> Result<()> {
        writeln!(self.output, "{}", line)?;
        Ok(())
    }

    /// Reads one answer without its line ending. End of input is an error.
    fn ask(&mut self, message: &str, what: &str) -> Result<String> {
        write!(self.output, "{}", message)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PipelineError::Input(format!("no {} given", what)));
        }
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }

    /// Keeps asking for a symbol until one has continuous phenotype data and
    /// its alleles are accepted.
    pub fn choose_gene(&mut self) -> Result<PhenotypeCatalog> {
        loop {
            let (symbol, preset) = match self.gene.take() {
                Some(symbol) => (symbol, true),
                None => (self.ask("Gene symbol: ", "gene symbol")?, false),
            };

            let catalog = match self.pipeline.search_gene(&symbol) {
                Ok(catalog) => catalog,
                Err(e) if e.suggests_another_gene() => {
                    debug!("{}", e);
                    self.say(&e)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.say(format!(
                "IMPC found allele(s) for {}: {}",
                catalog.gene().symbol,
                catalog.alleles().join(", ")
            ))?;
            if catalog.selectable_terms().is_empty() {
                self.say(format!(
                    "{} has no phenotype calls with continuous data; try another gene",
                    catalog.gene().symbol
                ))?;
                continue;
            }

            if preset || wants_to_proceed(&self.ask("Proceed with these alleles? [Y/n]: ", "answer")?) {
                return Ok(catalog);
            }
        }
    }

    /// Lists the selectable terms and asks until one of them is typed.
    pub fn choose_term(&mut self, catalog: &PhenotypeCatalog) -> Result<(String, PhenotypeSelection)> {
        self.say(format!("Phenotypes with continuous data for {}:", catalog.gene().symbol))?;
        for term in catalog.selectable_terms() {
            self.say(format!("  {}", term))?;
        }

        loop {
            let term = match self.term.take() {
                Some(term) => term,
                None => self.ask("Phenotype term: ", "phenotype term")?,
            };
            match catalog.select(&term) {
                Ok(selection) => return Ok((term.trim().to_string(), selection)),
                Err(e) => self.say(&e)?,
            }
        }
    }

    pub fn choose(&mut self) -> Result<Choice> {
        let catalog = self.choose_gene()?;
        let (term, selection) = self.choose_term(&catalog)?;
        Ok(Choice {
            catalog,
            term,
            selection,
        })
    }

    /// Chooses a gene, then tries terms until one can be analysed. A term
    /// whose cohort cannot be resolved sends the user back to the term list.
    pub fn analyse(&mut self) -> Result<(Choice, Analysis)> {
        let catalog = self.choose_gene()?;
        loop {
            let (term, selection) = self.choose_term(&catalog)?;
            info!("'{}' maps to {}", term, selection);

            match self.pipeline.analyse(&selection) {
                Ok(analysis) => {
                    let choice = Choice {
                        catalog,
                        term,
                        selection,
                    };
                    return Ok((choice, analysis));
                }
                Err(e) if e.suggests_another_phenotype() => self.say(&e)?,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::query_builder::QueryKind;
    use crate::test_support::{experiment_csv, MockService, EXPERIMENT_HEADER, PHENOTYPE_HEADER};

    const STRAIN: &str = "MGI:2159965";

    fn service() -> MockService {
        MockService::new()
            .respond_when(
                QueryKind::GenotypePhenotype,
                "marker_symbol",
                "Abc1",
                format!(
                    "{}\nAbc1,Abc1<tm1a(KOMP)Wtsi>,abnormal behavior,IMPC_OFD_001_001,MAAB,\n",
                    PHENOTYPE_HEADER
                ),
            )
            .respond(
                QueryKind::GenotypePhenotype,
                format!(
                    "{}\n\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hematocrit,IMPC_HEM_002_001,MEBV,-4.51\n\
Fbxo7,Fbxo7<tm1a(EUCOMM)Wtsi>,decreased hemoglobin content,IMPC_HEM_005_001,MEBV,-3.2\n",
                    PHENOTYPE_HEADER
                ),
            )
            .respond_when(
                QueryKind::Experiment,
                "parameter_stable_id",
                "IMPC_HEM_002_001",
                experiment_csv(&[
                    ("experimental", "male", 44.0, "mg-hem", "WTSI", STRAIN),
                    ("experimental", "female", 41.0, "mg-hem", "WTSI", STRAIN),
                ]),
            )
            .respond_when(
                QueryKind::Experiment,
                "parameter_stable_id",
                "IMPC_HEM_005_001",
                format!("{}\n", EXPERIMENT_HEADER),
            )
            .respond(
                QueryKind::ControlData,
                experiment_csv(&[
                    ("control", "male", 48.0, "mg-hem", "WTSI", STRAIN),
                    ("control", "female", 47.0, "mg-hem", "WTSI", STRAIN),
                ]),
            )
    }

    #[test]
    fn answers_other_than_no_accept() {
        assert!(wants_to_proceed(""));
        assert!(wants_to_proceed("Y"));
        assert!(wants_to_proceed("yes\n"));
        assert!(!wants_to_proceed("n"));
        assert!(!wants_to_proceed(" No "));
    }

    #[test]
    fn phenotype_without_experimental_data_returns_to_the_term_prompt() {
        let pipeline = Pipeline::new(service(), Config::default());
        let input = "Fbxo7\ny\ndecreased hemoglobin content\ndecreased hematocrit\n";
        let mut out = Vec::new();

        let (choice, analysis) = Session::new(&pipeline, input.as_bytes(), &mut out)
            .analyse()
            .unwrap();
        assert_eq!(choice.term, "decreased hematocrit");
        assert_eq!(analysis.dataset.len(), 4);
        assert_eq!(pipeline.service().requests_of(QueryKind::GenotypePhenotype).len(), 1);
        assert_eq!(pipeline.service().requests_of(QueryKind::Experiment).len(), 2);

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("no experimental data for parameter IMPC_HEM_005_001"));
        assert_eq!(shown.matches("Phenotype term: ").count(), 2);
    }

    #[test]
    fn gene_without_continuous_terms_returns_to_the_gene_prompt() {
        let pipeline = Pipeline::new(service(), Config::default());
        let mut out = Vec::new();

        let catalog = Session::new(&pipeline, "Abc1\nFbxo7\n\n".as_bytes(), &mut out)
            .choose_gene()
            .unwrap();
        assert_eq!(catalog.gene().symbol, "Fbxo7");

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("Abc1 has no phenotype calls with continuous data"));
        assert_eq!(shown.matches("Gene symbol: ").count(), 2);
    }

    #[test]
    fn alleles_are_shown_and_can_be_declined() {
        let pipeline = Pipeline::new(service(), Config::default());
        let mut out = Vec::new();

        let catalog = Session::new(&pipeline, "Fbxo7\nn\nFbxo7\ny\n".as_bytes(), &mut out)
            .choose_gene()
            .unwrap();
        assert_eq!(catalog.gene().symbol, "Fbxo7");
        assert_eq!(pipeline.service().requests_of(QueryKind::GenotypePhenotype).len(), 2);

        let shown = String::from_utf8(out).unwrap();
        assert_eq!(
            shown.matches("IMPC found allele(s) for Fbxo7: Fbxo7<tm1a(EUCOMM)Wtsi>").count(),
            2
        );
        assert_eq!(shown.matches("Proceed with these alleles? [Y/n]: ").count(), 2);
    }

    #[test]
    fn presets_run_without_prompting() {
        let pipeline = Pipeline::new(service(), Config::default());
        let mut out = Vec::new();

        let choice = Session::new(&pipeline, "".as_bytes(), &mut out)
            .with_gene(Some("Fbxo7".to_string()))
            .with_term(Some("decreased hematocrit".to_string()))
            .choose()
            .unwrap();
        assert_eq!(choice.selection.parameter_stable_id, "IMPC_HEM_002_001");

        let shown = String::from_utf8(out).unwrap();
        assert!(!shown.contains("Proceed with these alleles?"));
    }

    #[test]
    fn end_of_input_ends_the_session() {
        let pipeline = Pipeline::new(service(), Config::default());
        let mut out = Vec::new();

        let result = Session::new(&pipeline, "Fbxo 7\n".as_bytes(), &mut out).choose();
        match result {
            Err(PipelineError::Input(message)) => assert_eq!(message, "no gene symbol given"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(pipeline.service().requests().is_empty());
    }
}
