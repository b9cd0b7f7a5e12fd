//! Interface de terminal do reviewflow: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um workflow no terminal, recebendo os eventos do motor
//! como [`WorkflowObserver`].

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use reviewflow::error::{StepError, WorkflowError};
use reviewflow::workflow::{JobOutcome, RunReport, State, WorkflowObserver};

/// Indicador visual de progresso para a execução de um workflow no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Rótulo "game/job" prefixado às mensagens.
    label: String,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner para o job e retorna a instância de progresso.
    pub fn start(game_id: &str, job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        // Template inválido cai no estilo padrão do spinner.
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        let label = format!("{game_id}/{job_id}");
        pb.set_message(format!("{label}: {}", State::Preparing));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            label,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resultado final do workflow.
    pub fn complete(&self, result: &Result<RunReport, WorkflowError>) {
        self.pb.finish_and_clear();
        match result {
            Ok(report) => match report.outcome {
                JobOutcome::Succeeded => println!(
                    "  {} {} succeeded ({} records stored)",
                    self.green.apply_to("✓"),
                    self.label,
                    report.records_stored.unwrap_or(0)
                ),
                JobOutcome::Stopped => println!(
                    "  {} {} was stopped",
                    self.yellow.apply_to("■"),
                    self.label
                ),
                JobOutcome::Failed => println!(
                    "  {} {} failed: {}",
                    self.red.apply_to("✗"),
                    self.label,
                    report
                        .context
                        .status_message()
                        .unwrap_or("batch job reported failure")
                ),
            },
            Err(err) => println!("  {} {} aborted: {err}", self.red.apply_to("✗"), self.label),
        }
        if let Ok(report) = result
            && let Some(err) = &report.notification_error
        {
            println!(
                "  {} notification not delivered: {err}",
                self.yellow.apply_to("!")
            );
        }
    }

    /// Imprime o relatório da execução em JSON com estilo colorido.
    pub fn print_report(&self, report: &RunReport) {
        let style = match report.outcome {
            JobOutcome::Succeeded => &self.green,
            JobOutcome::Failed => &self.red,
            JobOutcome::Stopped => &self.yellow,
        };
        println!();
        println!("{}", style.apply_to("─── Run Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}

impl WorkflowObserver for JobProgress {
    fn on_transition(&self, _from: State, to: State) {
        self.pb.set_message(format!("{}: {to}", self.label));
    }

    fn on_retry(&self, attempt: u32, max_attempts: u32, wait: Duration, error: &StepError) {
        self.pb.println(format!(
            "  {} Dispatch {attempt}/{max_attempts} rejected ({error}), retrying in {}s",
            self.yellow.apply_to("↻"),
            wait.as_secs()
        ));
    }

    fn on_poll(&self, poll: u32, status: &str) {
        self.pb
            .set_message(format!("{}: POLLING #{poll} ({status})", self.label));
    }
}
