use std::{env, fs, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Deserialize;

use common::config;
use common::job::{Job, JobStatus};
use common::protocol::{
    ActionReply, JobResults, JoinReply, JoinRequest, RddReply, ReadCsvRequest, ReadTextFileRequest,
    TransformRequest,
};

/// URL base del driver.
/// - En Docker: DRIVER_URL=http://driver:9000
/// - Local: default http://localhost:9000
fn driver_base_url() -> String {
    env::var("DRIVER_URL").unwrap_or_else(|_| "http://localhost:9000".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI fino para hablar con el driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job definido en un archivo JSON
    SubmitJob {
        #[arg(value_name = "ARCHIVO_JSON")]
        file: String,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: u64,
    },
    /// Muestra el detalle de tareas de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: u64,
    },
    /// Sigue el estado de un job hasta que termine
    Watch {
        #[arg(value_name = "JOB_ID")]
        id: u64,
    },
}

/* ---------------- definición del job ---------------- */

#[derive(Debug, Deserialize)]
struct JobFile {
    name: String,
    source: SourceSpec,
    #[serde(default)]
    transforms: Vec<TransformSpec>,
    action: ActionSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
enum SourceSpec {
    Text {
        path: String,
        #[serde(default)]
        num_partitions: Option<usize>,
    },
    Csv {
        path: String,
        key_column: String,
        #[serde(default)]
        num_partitions: Option<usize>,
    },
}

#[derive(Debug, Deserialize)]
struct TransformSpec {
    op: String,
    #[serde(default)]
    func: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ActionSpec {
    Collect,
    Reduce {
        #[serde(default)]
        func: Option<String>,
    },
    Join {
        with: SourceSpec,
        #[serde(default)]
        output: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::builder().timeout(config::rpc_timeout()).build()?;
    let base_url = driver_base_url();

    match cli.command {
        Commands::SubmitJob { file } => submit_job(&client, &base_url, &file).await,
        Commands::Status { id } => status(&client, &base_url, id).await,
        Commands::Results { id } => results(&client, &base_url, id).await,
        Commands::Watch { id } => watch(&client, &base_url, id).await,
    }
}

/* ---------------- submit-job ---------------- */

async fn submit_job(client: &Client, base_url: &str, file: &str) -> Result<()> {
    let data = fs::read_to_string(file)?;
    let job: JobFile = serde_json::from_str(&data)?;

    println!("Enviando job '{}'...", job.name);

    let mut rdd_id = create_source(client, base_url, &job.source).await?;
    for transform in &job.transforms {
        rdd_id = apply_transform(client, base_url, rdd_id, transform).await?;
    }

    match &job.action {
        ActionSpec::Collect => {
            let url = format!("{base_url}/api/v1/rdd/{rdd_id}/collect");
            let reply: ActionReply = client.post(&url).send().await?.json().await?;
            print_action(&reply)?;
        }

        ActionSpec::Reduce { func } => {
            let url = format!("{base_url}/api/v1/rdd/{rdd_id}/reduce");
            let reply: ActionReply = client
                .post(&url)
                .json(&TransformRequest {
                    func_name: func.clone(),
                })
                .send()
                .await?
                .json()
                .await?;
            print_action(&reply)?;
        }

        ActionSpec::Join { with, output } => {
            let right_id = create_source(client, base_url, with).await?;
            let url = format!("{base_url}/api/v1/join");
            let reply: JoinReply = client
                .post(&url)
                .json(&JoinRequest {
                    rdd_id1: rdd_id,
                    rdd_id2: right_id,
                    output_path: output.clone(),
                })
                .send()
                .await?
                .json()
                .await?;

            println!("Join terminado:");
            println!("  estado: {}", reply.status);
            if let Some(job_id) = reply.job_id {
                println!("  job_id: {job_id}");
            }
            if let Some(new_rdd) = reply.rdd_id {
                println!("  rdd resultado: {new_rdd}");
            }
            if let Some(output) = output {
                println!("  salida: {output}");
            }
            if let Some(error) = &reply.error {
                bail!("el join falló: {error}");
            }
        }
    }

    Ok(())
}

async fn create_source(client: &Client, base_url: &str, source: &SourceSpec) -> Result<u64> {
    let resp = match source {
        SourceSpec::Text {
            path,
            num_partitions,
        } => {
            let url = format!("{base_url}/api/v1/rdd/text");
            client
                .post(&url)
                .json(&ReadTextFileRequest {
                    path: path.clone(),
                    num_partitions: *num_partitions,
                })
                .send()
                .await?
        }
        SourceSpec::Csv {
            path,
            key_column,
            num_partitions,
        } => {
            let url = format!("{base_url}/api/v1/rdd/csv");
            client
                .post(&url)
                .json(&ReadCsvRequest {
                    path: path.clone(),
                    key_column: key_column.clone(),
                    num_partitions: *num_partitions,
                })
                .send()
                .await?
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("el driver rechazó la fuente ({status}): {body}");
    }

    let reply: RddReply = resp.json().await?;
    Ok(reply.rdd_id)
}

async fn apply_transform(
    client: &Client,
    base_url: &str,
    rdd_id: u64,
    transform: &TransformSpec,
) -> Result<u64> {
    let route = match transform.op.as_str() {
        "map" => "map",
        "filter" => "filter",
        "flat_map" => "flat_map",
        other => bail!("operación desconocida en el job: {other}"),
    };

    let url = format!("{base_url}/api/v1/rdd/{rdd_id}/{route}");
    let resp = client
        .post(&url)
        .json(&TransformRequest {
            func_name: transform.func.clone(),
        })
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("el driver rechazó la transformación ({status}): {body}");
    }

    let reply: RddReply = resp.json().await?;
    Ok(reply.rdd_id)
}

fn print_action(reply: &ActionReply) -> Result<()> {
    println!("Acción terminada:");
    println!("  estado: {}", reply.status);
    if let Some(job_id) = reply.job_id {
        println!("  job_id: {job_id}");
    }

    if let Some(error) = &reply.error {
        bail!("la acción falló: {error}");
    }

    println!("  filas ({}):", reply.rows.len());
    for row in &reply.rows {
        println!("    {} => {}", row.key, row.value);
    }
    Ok(())
}

/* ---------------- status / results / watch ---------------- */

async fn fetch_job(client: &Client, base_url: &str, id: u64) -> Result<Option<Job>> {
    let url = format!("{base_url}/api/v1/jobs/{id}");
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        return Ok(None);
    }
    Ok(Some(resp.json().await?))
}

async fn status(client: &Client, base_url: &str, id: u64) -> Result<()> {
    match fetch_job(client, base_url, id).await? {
        Some(job) => {
            println!("Job {id}:");
            println!("  rdd: {}", job.rdd);
            println!("  estado: {:?}", job.status);
            println!("  tareas: {}", job.tasks.len());
            Ok(())
        }
        None => bail!("no se encontró el job {id}"),
    }
}

async fn results(client: &Client, base_url: &str, id: u64) -> Result<()> {
    let url = format!("{base_url}/api/v1/jobs/{id}/results");
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        bail!("no se encontraron resultados para el job {id}");
    }

    let results: JobResults = resp.json().await?;
    println!("Resultados del job {}:", results.job_id);
    println!("  estado: {:?}", results.status);
    for task in &results.tasks {
        println!(
            "  tarea {} (partición {}): {:?}, intentos={}",
            task.id, task.partition_id, task.state, task.attempts
        );
    }
    Ok(())
}

async fn watch(client: &Client, base_url: &str, id: u64) -> Result<()> {
    println!("Siguiendo el job {id} (Ctrl+C para cortar)...");

    let mut last_status: Option<JobStatus> = None;
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;

        let Some(job) = fetch_job(client, base_url, id).await? else {
            bail!("no se encontró el job {id}");
        };

        if last_status != Some(job.status) {
            let done = job
                .tasks
                .iter()
                .filter(|t| {
                    matches!(
                        t.state,
                        common::job::TaskState::Succeeded | common::job::TaskState::Failed
                    )
                })
                .count();
            println!(
                "estado: {:?} ({done}/{} tareas terminadas)",
                job.status,
                job.tasks.len()
            );
            last_status = Some(job.status);
        }

        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            println!("Job terminado con estado {:?}", job.status);
            break;
        }
    }

    Ok(())
}
