//! Interface de linha de comando do Overwatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (analyze, serve)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Overwatch: análise de entrevistas gravadas.
#[derive(Debug, Parser)]
#[command(name = "overwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML (padrão: ./overwatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analisa uma gravação e imprime o relatório.
    Analyze {
        /// URL ou caminho local do vídeo da entrevista.
        source: String,

        /// Diretório base do workspace do job (sobrescreve `workspace_root`).
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Sobe a API HTTP de jobs.
    Serve {
        /// Endereço de escuta (sobrescreve `server.bind`).
        #[arg(long)]
        bind: Option<String>,
    },
}
