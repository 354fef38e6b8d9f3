use std::time::Duration;
use tokio::process::Command;

/// One GPU row reported by nvidia-smi.
#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub utilization_pct: f32,
    pub memory_used_mb: f32,
    pub memory_total_mb: f32,
    pub temperature_c: f32,
}

/// Query nvidia-smi. An absent or failing tool reads as "no GPUs",
/// never as an error.
pub async fn probe() -> Vec<GpuInfo> {
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,utilization.gpu,memory.used,memory.total,temperature.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output(),
    )
    .await;
    let out = match output {
        Ok(Ok(out)) if out.status.success() => out,
        _ => return Vec::new(),
    };
    parse_csv(&String::from_utf8_lossy(&out.stdout))
}

fn parse_csv(text: &str) -> Vec<GpuInfo> {
    let mut gpus = Vec::new();
    for line in text.lines() {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 5 {
            continue;
        }
        let numbers: Option<Vec<f32>> = parts[1..5]
            .iter()
            .map(|p| p.parse::<f32>().ok())
            .collect();
        let Some(numbers) = numbers else { continue };
        gpus.push(GpuInfo {
            name: parts[0].to_string(),
            utilization_pct: numbers[0],
            memory_used_mb: numbers[1],
            memory_total_mb: numbers[2],
            temperature_c: numbers[3],
        });
    }
    gpus
}
