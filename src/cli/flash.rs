use std::io;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::bus::{CanInterface, LinkSupervisor, SimReceiver, SimReceiverConfig};
use crate::cli::{FlashArgs, OutputFormat};
use crate::config::UpdateConfig;
use crate::image::FirmwareImage;
use crate::telemetry;
use crate::uploader::{FirmwareUploader, FlashReceipt};

#[derive(Serialize)]
struct FlashResult {
    firmware: String,
    digest: String,
    image_length: u32,
    blocks_written: u32,
    bytes_confirmed: u64,
    frames_sent: u64,
    retransmissions: u64,
    link_recoveries: u64,
    receiver_fw_version: Option<u32>,
}

/// Executes the `flash` command.
#[instrument(skip(args, out), level = "info", fields(firmware = %args.firmware().display(), ?output_format))]
pub(crate) async fn run<W>(args: &FlashArgs, out: &mut W, output_format: OutputFormat) -> Result<()>
where
    W: io::Write,
{
    let config = args.to_options().resolve()?;
    let source_bytes = std::fs::read(args.firmware())
        .with_context(|| format!("failed to read firmware image `{}`", args.firmware().display()))?;
    let image = FirmwareImage::from_bytes(source_bytes)?;
    info!(
        length = image.image_length(),
        blocks = image.block_count(),
        digest = %image.digest(),
        "loaded firmware image"
    );

    let channel = open_channel(args, &config).await?;
    let uploader = FirmwareUploader::new(&config, LinkSupervisor::new(channel));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let progress_span = info_span!("uploading firmware");
    progress_span.pb_set_style(&telemetry::upload_bar_style());
    progress_span.pb_set_message("Uploading firmware");
    progress_span.pb_set_length(u64::from(image.image_length()));
    let position_span = progress_span.clone();

    let receipt = uploader
        .flash(&image, &cancel, move |bytes, _total| {
            position_span.pb_set_position(bytes);
        })
        .instrument(progress_span.clone())
        .await;
    let receipt = match receipt {
        Ok(receipt) => {
            let finish_message = format!("{} Flash complete", "✓".green());
            progress_span.pb_set_finish_message(&finish_message);
            receipt
        }
        Err(error) => {
            let finish_message = format!("{} Flash failed", "✗".red());
            progress_span.pb_set_finish_message(&finish_message);
            return Err(error.into());
        }
    };

    render(args, &image, &receipt, out, output_format)
}

async fn open_channel(
    args: &FlashArgs,
    config: &UpdateConfig,
) -> Result<Box<dyn CanInterface>> {
    if args.sim() {
        let (receiver, _handle) = SimReceiver::new(
            SimReceiverConfig::builder()
                .ids(config.ids())
                .maybe_drop_every(args.sim_drop_every())
                .build(),
        );
        return Ok(Box::new(receiver));
    }

    #[cfg(target_os = "linux")]
    {
        let channel = crate::bus::SocketCanBus::open(config.bus(), config.bitrate()).await?;
        Ok(Box::new(channel))
    }
    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!("real CAN hardware needs Linux SocketCAN; use --sim on other platforms")
    }
}

fn render<W>(
    args: &FlashArgs,
    image: &FirmwareImage,
    receipt: &FlashReceipt,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            writeln!(
                out,
                "Flashed firmware: {} bytes in {} block(s); digest {}",
                receipt.bytes_confirmed(),
                receipt.blocks_written(),
                receipt.digest(),
            )?;
            if receipt.retransmissions() > 0 || receipt.link_recoveries() > 0 {
                writeln!(
                    out,
                    "Recovered from {} repeated frame(s) and {} link outage(s)",
                    receipt.retransmissions(),
                    receipt.link_recoveries(),
                )?;
            }
            if let Some(version) = receipt.receiver_fw_version() {
                writeln!(out, "Receiver firmware version: {version}")?;
            }
        }
        OutputFormat::Json => {
            write_json_line(
                out,
                &FlashResult {
                    firmware: args.firmware().display().to_string(),
                    digest: receipt.digest().to_string(),
                    image_length: image.image_length(),
                    blocks_written: receipt.blocks_written(),
                    bytes_confirmed: receipt.bytes_confirmed(),
                    frames_sent: receipt.frames_sent(),
                    retransmissions: receipt.retransmissions(),
                    link_recoveries: receipt.link_recoveries(),
                    receiver_fw_version: receipt.receiver_fw_version(),
                },
            )?;
        }
    }
    Ok(())
}

fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
