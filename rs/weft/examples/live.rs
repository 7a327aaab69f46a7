// cargo run --example live
//
// Writes a synthetic audio-only live stream into ./hls and keeps a rolling
// window of segments, the way an ingest server would drive the writer.
use bytes::Bytes;

use weft::{PrivData, Sample, Track, TrackCodec, VariantConfig, Writer, WriterConfig};

fn main() -> anyhow::Result<()> {
	init_logging();

	let config = WriterConfig {
		storage_dir: Some("hls".into()),
		..Default::default()
	};

	let mut writer = Writer::open(config)?;

	// AAC-LC, 48kHz, stereo. A real encoder provides the config and payloads.
	let track = Track::new(1, TrackCodec::Aac, 48_000).with_priv_data(PrivData::Aac {
		config: Bytes::from_static(&[0x11, 0x90]),
	});
	writer.add_variant(VariantConfig::new("audio", vec![track]))?;

	// Thirty seconds of silence-shaped frames, 1024 ticks each.
	let frame = Bytes::from_static(&[0u8; 64]);
	for index in 0..1407u64 {
		let sample = Sample::new(1, index * 1024, 1024, frame.clone());
		writer.write_sample("audio", sample)?;
	}

	writer.close()?;
	println!("wrote hls/audio/playlist.m3u8");

	Ok(())
}

fn init_logging() {
	// Logs at debug show each stored segment and playlist revision.
	use tracing_subscriber::EnvFilter;

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();
}
