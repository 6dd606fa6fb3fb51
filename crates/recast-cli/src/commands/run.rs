use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use recast_runtime::config::{parse_config, validate_config};
use recast_runtime::envelope::{RecordEnvelope, RoutedEnvelope};
use recast_runtime::{ChannelSink, PartitionedRunner, RecordSink, RunSummary};
use recast_types::{Record, Routed};
use tokio::sync::mpsc;

use super::{load_module, parse_env_overrides};

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Parse one JSON-lines input record, defaulting its topic to `input_topic`.
fn parse_input_line(line: &str, input_topic: &str) -> Result<Record> {
    let envelope: RecordEnvelope = serde_json::from_str(line)?;
    let record = envelope.into_record();
    if record.source_topic().is_empty() {
        let partition = record.partition();
        return Ok(record.with_origin(input_topic, partition));
    }
    Ok(record)
}

/// Execute the `run` command: replay records through the module and print
/// routed outputs to stdout as JSON lines.
pub async fn execute(
    module_path: &Path,
    config_path: &Path,
    input: Option<&Path>,
    dead_letters_path: Option<&Path>,
    env: &[String],
) -> Result<()> {
    // 1. Parse and validate transform YAML
    let overrides = parse_env_overrides(env)?;
    let config = parse_config(config_path)
        .with_context(|| format!("Failed to parse transform: {}", config_path.display()))?;
    validate_config(&config, &overrides)?;

    tracing::info!(
        transform = config.name.as_str(),
        input_topic = config.input_topic.as_str(),
        output_topics = ?config.output_topics,
        "Transform validated"
    );

    // 2. Load module
    let settings = config.guest_settings(&overrides)?;
    let module = load_module(module_path, &config, settings)?;

    // 3. Output writer
    let (tx, mut rx) = mpsc::channel::<Routed>(OUTPUT_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(routed) = rx.recv().await {
            let line = serde_json::to_string(&RoutedEnvelope::from(&routed))?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{line}")?;
            written += 1;
        }
        Ok::<u64, anyhow::Error>(written)
    });

    // 4. Replay input
    let mut runner = PartitionedRunner::new(
        Arc::new(module),
        config.runner_options(),
        move |_partition| Box::new(ChannelSink::new(tx.clone())) as Box<dyn RecordSink>,
    );

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut offsets: HashMap<i32, i64> = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_input_line(&line, &config.input_topic)
            .with_context(|| format!("Invalid record on input line {}", line_no + 1))?;
        let partition = record.partition();
        let offset = offsets.entry(partition).or_insert(0);
        if let Err(e) = runner.dispatch(partition, *offset, record).await {
            tracing::warn!(partition, offset = *offset, error = %e, "Skipping record");
        }
        *offset += 1;
    }

    // 5. Drain and report
    let reports = runner.finish().await;
    let written = writer.await.context("Output writer panicked")??;

    let mut total = RunSummary::default();
    let mut dead_letters = Vec::new();
    let mut failures = Vec::new();
    for (partition, outcome) in reports {
        total.absorb(&outcome.report.summary);
        dead_letters.extend(outcome.report.dead_letters);
        if let Some(e) = outcome.error {
            failures.push(format!("partition {partition}: {e}"));
        }
    }

    if let Some(path) = dead_letters_path {
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create dead-letter file: {}", path.display()))?;
        for letter in &dead_letters {
            writeln!(file, "{}", serde_json::to_string(letter)?)?;
        }
    } else if !dead_letters.is_empty() {
        tracing::warn!(
            count = dead_letters.len(),
            "Dead letters discarded; pass --dead-letters to keep them"
        );
    }

    eprintln!("Transform '{}' finished.", config.name);
    eprintln!("  Records in:      {}", total.records_in);
    eprintln!("  Records out:     {written}");
    eprintln!("  Filtered:        {}", total.filtered);
    eprintln!("  Retried:         {}", total.retried);
    eprintln!("  Dead-lettered:   {}", total.dead_lettered);
    if total.reinstantiated > 0 {
        eprintln!("  Reinstantiated:  {}", total.reinstantiated);
    }
    eprintln!("  Duration:        {:.2}s", total.duration_secs);

    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Transform stopped:\n  - {}", failures.join("\n  - "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_line_defaults_topic() {
        let record = parse_input_line(r#"{"key":"k1","value":"v1","timestamp":1000}"#, "numbers")
            .unwrap();
        assert_eq!(record.source_topic(), "numbers");
        assert_eq!(record.key(), Some(&b"k1"[..]));
        assert_eq!(record.timestamp(), 1000);
    }

    #[test]
    fn input_line_keeps_explicit_origin() {
        let record =
            parse_input_line(r#"{"value":"5","topic":"other","partition":2}"#, "numbers").unwrap();
        assert_eq!(record.source_topic(), "other");
        assert_eq!(record.partition(), 2);
    }

    #[test]
    fn input_line_rejects_garbage() {
        assert!(parse_input_line("not json", "numbers").is_err());
    }
}
