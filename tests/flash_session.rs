use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use canflash::{
    FirmwareImage, FirmwareUploader, LinkSupervisor, ProtocolError, SimReceiver,
    SimReceiverConfig, SimReceiverHandle, UpdateConfig, UpdateOptions, UploadError,
};

fn test_config() -> UpdateConfig {
    UpdateOptions::builder()
        .message_id("0x700")
        .baud(1_000_000)
        .report_granularity(16)
        .build()
        .resolve()
        .expect("complete options should resolve")
}

fn test_image(length: usize) -> FirmwareImage {
    let bytes: Vec<u8> = (0..length).map(|i| (i * 31 % 251) as u8).collect();
    FirmwareImage::from_bytes(bytes).expect("image within range should validate")
}

fn uploader_over(
    config: &UpdateConfig,
    receiver_config: SimReceiverConfig,
) -> (FirmwareUploader<'_>, SimReceiverHandle) {
    let (receiver, handle) = SimReceiver::new(receiver_config);
    let uploader = FirmwareUploader::new(config, LinkSupervisor::new(Box::new(receiver)));
    (uploader, handle)
}

#[tokio::test(start_paused = true)]
async fn flash_delivers_the_full_image_in_order() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, handle) =
        uploader_over(&config, SimReceiverConfig::builder().ids(config.ids()).build());
    let image = test_image(1000);
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert!(handle.complete());
    assert_eq!(image.bytes(), handle.written_image());
    assert_eq!(1000, receipt.bytes_confirmed());
    assert_eq!(143, receipt.blocks_written());
    assert_eq!(0, receipt.link_recoveries());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn flash_handles_an_image_shorter_than_one_block() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, handle) =
        uploader_over(&config, SimReceiverConfig::builder().ids(config.ids()).build());
    let image = test_image(3);
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert!(handle.complete());
    assert_eq!(image.bytes(), handle.written_image());
    assert_eq!(3, receipt.bytes_confirmed());
    assert_eq!(1, receipt.blocks_written());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_data_frames_are_retransmitted_until_written() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, handle) = uploader_over(
        &config,
        SimReceiverConfig::builder()
            .ids(config.ids())
            .drop_every(NonZeroU64::new(5).expect("5 is nonzero"))
            .build(),
    );
    let image = test_image(700);
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert!(handle.complete());
    assert_eq!(image.bytes(), handle.written_image());
    assert!(receipt.retransmissions() > 0);
    assert!(receipt.frames_sent() > 100);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn link_faults_trigger_exactly_one_recovery_each() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, handle) = uploader_over(
        &config,
        SimReceiverConfig::builder()
            .ids(config.ids())
            .faulty_sends(2)
            .build(),
    );
    let image = test_image(70);
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert!(handle.complete());
    // First send fails, is recovered once, and its retry fails too; the
    // handshake round then carries on and the next send succeeds.
    assert_eq!(1, receipt.link_recoveries());
    assert_eq!(1, handle.resets());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn progress_reports_are_monotone_and_reach_the_image_length() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, _handle) =
        uploader_over(&config, SimReceiverConfig::builder().ids(config.ids()).build());
    let image = test_image(1000);
    let cancel = CancellationToken::new();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    uploader
        .flash(&image, &cancel, move |bytes, total| {
            assert_eq!(1000, total);
            sink.lock().expect("report sink").push(bytes);
        })
        .await?;

    let reports = reports.lock().expect("report sink").clone();
    assert_eq!(Some(&0), reports.first());
    assert_eq!(Some(&1000), reports.last());
    assert!(reports.windows(2).all(|pair| pair[0] <= pair[1]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_session() {
    let config = test_config();
    let (uploader, handle) =
        uploader_over(&config, SimReceiverConfig::builder().ids(config.ids()).build());
    let image = test_image(70);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = uploader.flash(&image, &cancel, |_bytes, _total| {}).await;

    assert_matches!(
        result,
        Err(ProtocolError::Upload(inner)) if matches!(*inner, UploadError::Cancelled)
    );
    assert!(!handle.complete());
}

#[tokio::test(start_paused = true)]
async fn receiver_firmware_version_lands_in_the_receipt() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, _handle) = uploader_over(
        &config,
        SimReceiverConfig::builder()
            .ids(config.ids())
            .fw_version(0x0102_0304)
            .build(),
    );
    let image = test_image(70);
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert_eq!(Some(0x0102_0304), receipt.receiver_fw_version());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_length_image_completes_without_data_frames() -> anyhow::Result<()> {
    let config = test_config();
    let (uploader, handle) =
        uploader_over(&config, SimReceiverConfig::builder().ids(config.ids()).build());
    let image = FirmwareImage::from_bytes(Vec::new()).expect("empty image should validate");
    let cancel = CancellationToken::new();

    let receipt = uploader.flash(&image, &cancel, |_bytes, _total| {}).await?;

    assert_eq!(0, receipt.bytes_confirmed());
    assert_eq!(0, receipt.blocks_written());
    assert_eq!(0, handle.data_frames_seen());
    assert!(handle.complete());
    Ok(())
}
