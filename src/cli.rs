//! Interface de linha de comando do feira baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, demo)
//! e flags globais (--max-retries, --timeout-secs, --verbose).

use clap::{Parser, Subcommand};

/// feira — pipeline assíncrono de extração de listas de compras.
#[derive(Debug, Parser)]
#[command(name = "feira", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número máximo de retentativas do estágio de OCR.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Janela de suspensão em segundos aguardando o sinal de conclusão.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa um documento já presente no object storage.
    Run {
        /// Bucket onde o documento está armazenado.
        #[arg(long)]
        bucket: String,

        /// Chave do objeto (ex.: "uploads/receipt.jpg").
        #[arg(long)]
        key: String,
    },

    /// Executa a demonstração embutida do pipeline com serviços simulados.
    Demo,
}
