//! Interface de linha de comando do reviewflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, run-all, status,
//! stop, demo) e flags globais (--verbose, --json).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Orquestra jobs de classificação de reviews em lote, da preparação à notificação.
#[derive(Debug, Parser)]
#[command(name = "reviewflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite os logs em JSON, uma linha por evento.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o workflow completo para um job.
    Run {
        /// Identificador do jogo.
        game_id: String,

        /// Identificador do job dentro do jogo.
        job_id: String,

        /// Exportação CSV de reviews a importar antes da execução.
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Executa em paralelo todos os jobs listados num manifesto TOML.
    RunAll {
        /// Caminho do manifesto com entradas `[[jobs]]`.
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Consulta o status de um job já submetido.
    Status {
        /// Identificador devolvido pelo serviço na submissão.
        job_handle: String,
    },

    /// Solicita a parada de um job em execução.
    Stop {
        /// Identificador devolvido pelo serviço na submissão.
        job_handle: String,
    },

    /// Executa a demonstração embutida com colaboradores simulados.
    Demo,
}
