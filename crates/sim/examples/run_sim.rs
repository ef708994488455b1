//! Runs a host and a simulated MCU over a Unix socket, drives a handful of
//! G-code-derived commands through them, and writes the exchange out as a
//! trace file suitable for diffing against a golden trace in CI.

use anyhow::Result;
use sim::fake_mcu::{McuCommand, McuResponse};
use sim::harness::{SimHost, TraceContent, TraceDirection};
use sim::SimMcu;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::UnixStream;
use tracing::info;

async fn drive_gcode(
    mut reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    mut writer: WriteHalf<UnixStream>,
    gcode_commands: Vec<&str>,
    sim_host: &mut SimHost,
) -> Result<()> {
    for gcode_cmd_str in gcode_commands {
        let mcu_cmd = match gcode_cmd_str {
            "G28" => McuCommand::Move { steps: 1000 },
            "M119" => McuCommand::ReadEndstop {
                axis: "X".to_string(),
            },
            "M112" => McuCommand::EmergencyStop,
            _ => continue,
        };

        let cmd_json = serde_json::to_string(&mcu_cmd)? + "\n";
        writer.write_all(cmd_json.as_bytes()).await?;
        sim_host.record_trace(TraceDirection::HostToMcu, TraceContent::Command(mcu_cmd));

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;
        let mcu_response: McuResponse = serde_json::from_str(response_line.trim())?;
        sim_host.record_trace(TraceDirection::McuToHost, TraceContent::Response(mcu_response.clone()));
        info!(?mcu_response, "host received response");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let socket_path = "/tmp/sim_mcu.sock";
    let trace_path = Path::new("/tmp/sim_trace.json");
    let golden_trace_path = Path::new("golden_traces/basic_flow.json");

    let _ = std::fs::remove_file(socket_path);
    std::fs::create_dir_all("golden_traces")?;

    let sim_mcu = SimMcu::new(socket_path);
    tokio::spawn(async move {
        if let Err(e) = sim_mcu.run().await {
            eprintln!("SimMcu failed: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let gcode = vec!["G28", "M119", "M112"];
    let mut sim_host = SimHost::new(socket_path);
    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, writer) = tokio::io::split(stream);
    drive_gcode(BufReader::new(reader), writer, gcode, &mut sim_host).await?;

    sim_host.dump_trace(trace_path)?;
    if !golden_trace_path.exists() {
        info!("no golden trace yet, seeding one from this run");
        sim_host.dump_trace(golden_trace_path)?;
    }

    info!(trace = %trace_path.display(), golden = %golden_trace_path.display(), "simulation complete");
    let _ = std::fs::remove_file(socket_path);

    Ok(())
}
