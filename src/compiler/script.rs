//! Full-firewall script assembly: header template, firewall options
//! preamble, the five policy tables with banner framing, footer template.
//! The whole pipeline is fatal on template or output I/O errors; per-rule
//! render failures only keep the firewall's needs-compile bit set.

use super::error::CompileError;
use super::{segments_by_table, CompiledSegment, PolicyCompiler};
use crate::assembler;
use crate::database::{self, Db};
use crate::progress::{ProgressPayload, ProgressSink};
use crate::rules::RuleFamily;
use crate::Result;
use bon::Builder;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Clone, Builder)]
pub struct ScriptConfig {
    pub data_dir: PathBuf,
    #[builder(default = String::from("install.sh"))]
    pub script_name: String,
    pub header_file: PathBuf,
    pub footer_file: PathBuf,
}

#[derive(Debug)]
pub struct ScriptOutput {
    pub path: PathBuf,
    pub segments: Vec<CompiledSegment>,
    /// True when every segment rendered cleanly and the firewall's
    /// needs-compile bit was cleared.
    pub complete: bool,
}

/// Compile a firewall's whole policy and stream it into the per-firewall
/// script file. Partial output after an error must be treated as invalid.
pub async fn write_firewall_script(
    db: &Db,
    config: &ScriptConfig,
    fwcloud: i64,
    firewall: i64,
    progress: &dyn ProgressSink,
) -> Result<ScriptOutput> {
    let mut tx = db.begin().await?;

    let fw = database::firewall_by_id(&mut tx, firewall).await?;
    let rules_data =
        assembler::assemble_for_compiler(&mut tx, fwcloud, firewall, RuleFamily::Policy, None)
            .await?;
    let segments = PolicyCompiler::compile(&rules_data, progress);

    // Templates are read up front; a missing one aborts before any output.
    let header = fs::read_to_string(&config.header_file)
        .await
        .map_err(|e| CompileError::template(&config.header_file, e))?;
    let footer = fs::read_to_string(&config.footer_file)
        .await
        .map_err(|e| CompileError::template(&config.footer_file, e))?;

    let dir = config
        .data_dir
        .join(fwcloud.to_string())
        .join(firewall.to_string());
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| CompileError::output(&dir, e))?;
    let path = dir.join(&config.script_name);

    let mut file = fs::File::create(&path)
        .await
        .map_err(|e| CompileError::output(&path, e))?;

    write_all(&mut file, &path, header.as_bytes()).await?;
    write_all(
        &mut file,
        &path,
        format!(
            "\ngreeting_msg() {{\nlog \"CloudWall - Loading firewall policy generated: {}\"\n}}\n\npolicy_load() {{\n",
            chrono::Local::now().to_rfc2822()
        )
        .as_bytes(),
    )
    .await?;

    if fw.is_stateful() {
        progress.emit(ProgressPayload::notice("--- STATEFUL FIREWALL ---\n\n"));
        write_all(
            &mut file,
            &path,
            b"# Stateful firewall.\n\
              $IPTABLES -A INPUT -m state --state ESTABLISHED,RELATED -j ACCEPT\n\
              $IPTABLES -A OUTPUT -m state --state ESTABLISHED,RELATED -j ACCEPT\n\
              $IPTABLES -A FORWARD -m state --state ESTABLISHED,RELATED -j ACCEPT\n",
        )
        .await?;
    } else {
        progress.emit(ProgressPayload::notice("--- STATELESS FIREWALL ---\n\n"));
    }

    for (table, table_segments) in segments_by_table(&segments) {
        progress.emit(ProgressPayload::notice(format!(
            "{} TABLE:\n",
            table.table_name()
        )));

        let title = format!("{} TABLE", table.table_name());
        write_all(
            &mut file,
            &path,
            format!(
                "\n\necho -e \"\\n{title}\\n{}\"\n",
                "-".repeat(title.len())
            )
            .as_bytes(),
        )
        .await?;

        for segment in table_segments {
            if !segment.cs.is_empty() {
                write_all(&mut file, &path, segment.cs.as_bytes()).await?;
            }
        }
    }

    write_all(&mut file, &path, b"\n}\n\n").await?;
    write_all(&mut file, &path, footer.as_bytes()).await?;
    file.flush()
        .await
        .map_err(|e| CompileError::output(&path, e))?;

    progress.emit(ProgressPayload::notice("END\n"));

    // The compiled bit is cleared only when every rule rendered.
    let complete = segments.iter().all(|s| s.error.is_none());
    if complete {
        database::mark_firewall_compiled(&mut tx, firewall).await?;
    }
    database::commit(tx).await?;

    info!(firewall, complete, path = %path.display(), "firewall script written");

    Ok(ScriptOutput {
        path,
        segments,
        complete,
    })
}

async fn write_all(file: &mut fs::File, path: &Path, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes)
        .await
        .map_err(|e| CompileError::output(path, e))?;
    Ok(())
}
