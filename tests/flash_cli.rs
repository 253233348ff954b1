use clap::Parser;
use pretty_assertions::assert_eq;

use canflash::{Args, OutputFormat, run_with_telemetry};

fn write_temp_firmware(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("canflash-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).expect("temp firmware should be writable");
    path
}

#[tokio::test]
async fn flash_command_emits_a_json_result() -> anyhow::Result<()> {
    let firmware = write_temp_firmware("json.bin", &[0x5A; 64]);
    let args = Args::try_parse_from([
        "canflash",
        "flash",
        firmware.to_str().expect("temp path should be valid UTF-8"),
        "--id",
        "0x700",
        "--baud",
        "1000000",
        "--frame-interval",
        "50us",
        "--sim",
    ])?;
    let mut out = Vec::new();

    run_with_telemetry(
        args.into_command(),
        &mut out,
        false,
        None,
        OutputFormat::Json,
    )
    .await?;

    let result: serde_json::Value = serde_json::from_slice(&out)?;
    assert_eq!(Some(64), result["bytes_confirmed"].as_u64());
    assert_eq!(Some(64), result["image_length"].as_u64());
    assert_eq!(Some(10), result["blocks_written"].as_u64());
    assert_eq!(Some(0), result["link_recoveries"].as_u64());
    assert_eq!(
        Some("ce7b785b1be7ad4f72773217db8c5d3e"),
        result["digest"].as_str().map(str::to_ascii_lowercase).as_deref()
    );
    std::fs::remove_file(&firmware).ok();
    Ok(())
}

#[tokio::test]
async fn flash_command_emits_pretty_lines() -> anyhow::Result<()> {
    let firmware = write_temp_firmware("pretty.bin", &[0x11; 10]);
    let args = Args::try_parse_from([
        "canflash",
        "flash",
        firmware.to_str().expect("temp path should be valid UTF-8"),
        "--id",
        "0x700",
        "--baud",
        "500000",
        "--frame-interval",
        "50us",
        "--sim",
    ])?;
    let mut out = Vec::new();

    run_with_telemetry(
        args.into_command(),
        &mut out,
        false,
        None,
        OutputFormat::Pretty,
    )
    .await?;

    let rendered = String::from_utf8(out)?;
    assert!(rendered.starts_with("Flashed firmware: 10 bytes in 2 block(s)"));
    std::fs::remove_file(&firmware).ok();
    Ok(())
}

#[tokio::test]
async fn flash_command_fails_without_required_options() -> anyhow::Result<()> {
    let firmware = write_temp_firmware("no-id.bin", &[0x22; 8]);
    let args = Args::try_parse_from([
        "canflash",
        "flash",
        firmware.to_str().expect("temp path should be valid UTF-8"),
        "--sim",
    ])?;
    let mut out = Vec::new();

    let result = run_with_telemetry(
        args.into_command(),
        &mut out,
        false,
        None,
        OutputFormat::Json,
    )
    .await;

    let error = result.expect_err("missing update_message_id should fail");
    assert!(error.to_string().contains("update_message_id"));
    std::fs::remove_file(&firmware).ok();
    Ok(())
}
