//! Interface de terminal do feira — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente
//! a execução de um run no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::run::{RunReport, RunState};

/// Indicador visual de progresso para a execução de um run no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct RunProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para mensagens de retentativa.
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com a chave do documento e retorna a instância de progresso.
    pub fn start(key: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("PENDING_VALIDATION: {key}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado atual.
    #[allow(dead_code)]
    pub fn update_state(&self, state: RunState) {
        self.pb.set_message(format!("{state}"));
    }

    /// Exibe uma mensagem de retentativa com o número da tentativa e o motivo.
    #[allow(dead_code)]
    pub fn retry(&self, attempt: u32, max: u32, reason: &str) {
        self.pb.println(format!(
            "  {} Retry {attempt}/{max}: {reason}",
            self.yellow.apply_to("↻")
        ));
    }

    /// Finaliza o spinner para um documento rejeitado na ingestão.
    pub fn reject(&self, reason: &str) {
        self.pb.finish_and_clear();
        println!("  {} Rejected: {reason}", self.red.apply_to("✗"));
    }

    /// Finaliza o spinner e exibe o resultado final do run.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn complete(&self, report: &RunReport) {
        self.pb.finish_and_clear();
        match report.state {
            RunState::Succeeded => {
                println!(
                    "  {} Run succeeded with {} item(s)",
                    self.green.apply_to("✓"),
                    report.item_count.unwrap_or(0)
                );
            }
            _ => {
                println!(
                    "  {} Run failed: {}",
                    self.red.apply_to("✗"),
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    /// Imprime o relatório do run formatado em JSON com estilo colorido.
    pub fn print_report(&self, report: &RunReport) {
        let status_style = match report.state {
            RunState::Succeeded => &self.green,
            RunState::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Run Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}
