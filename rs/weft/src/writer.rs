use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::config::{WriterConfig, WriterKind, WriterMode};
use crate::model::{rescale, MediaSample, Sample, TrackKind};
use crate::mux::ContainerKind;
use crate::playlist::{
	render_master, render_media, MasterRendition, MasterStream, MediaContext, RenditionReport, Segment,
};
use crate::queue::{PartGroup, QueueAction, SampleQueue, TrackKey};
use crate::storage::{DirStorage, Storage};
use crate::variant::{RenditionConfig, Variant, VariantConfig, VariantRole};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Init,
	Muxing,
	Closed,
}

/// The wall clock anchor for `EXT-X-PROGRAM-DATE-TIME`, frozen by the first
/// sample across all variants and cleared by discontinuities.
struct Anchor {
	wall: DateTime<Utc>,
	dts: u64,
	timescale: u32,
}

/// The HLS writer: feeds samples through the per-variant pipelines and hands
/// segments, parts and manifests to the storage.
///
/// All operations are synchronous; storage calls complete before the
/// triggering call returns.
pub struct Writer<S: Storage> {
	config: WriterConfig,
	storage: S,
	state: State,
	variants: Vec<Variant>,
	queues: Vec<SampleQueue>,
	variant_queue: Vec<usize>,
	anchor: Option<Anchor>,
	master_dirty: bool,
}

impl Writer<DirStorage> {
	/// Construct a writer persisting into `config.storage_dir`.
	pub fn open(config: WriterConfig) -> Result<Self> {
		let dir = config.storage_dir.clone().ok_or(Error::MissingStorageDir)?;
		Self::new(config, DirStorage::new(dir))
	}
}

impl<S: Storage> Writer<S> {
	pub fn new(mut config: WriterConfig, storage: S) -> Result<Self> {
		config.validate()?;

		Ok(Self {
			config,
			storage,
			state: State::Init,
			variants: Vec::new(),
			queues: Vec::new(),
			variant_queue: Vec::new(),
			anchor: None,
			master_dirty: false,
		})
	}

	pub fn storage(&self) -> &S {
		&self.storage
	}

	pub fn into_storage(self) -> S {
		self.storage
	}

	/// Add a variant stream. Only valid before the first sample is written.
	pub fn add_variant(&mut self, variant: VariantConfig) -> Result<()> {
		self.ensure_init()?;

		if self.config.kind == WriterKind::Media && !self.variants.is_empty() {
			return Err(Error::SingleVariant);
		}

		self.push_variant(
			variant.id,
			VariantRole::Stream {
				audio: variant.audio,
				subtitles: variant.subtitles,
			},
			variant.tracks,
		)
	}

	/// Add an alternate rendition. Only valid on master writers, before writing.
	pub fn add_rendition(&mut self, rendition: RenditionConfig) -> Result<()> {
		self.ensure_init()?;

		if self.config.kind == WriterKind::Media {
			return Err(Error::NoRenditions);
		}

		self.push_variant(
			rendition.id,
			VariantRole::Rendition {
				group_id: rendition.group_id,
				name: rendition.name,
				language: rendition.language,
				default: rendition.default,
				auto_select: rendition.auto_select,
			},
			rendition.tracks,
		)
	}

	fn push_variant(&mut self, id: String, role: VariantRole, tracks: Vec<crate::Track>) -> Result<()> {
		if self.variants.iter().any(|variant| variant.id == id) {
			return Err(Error::DuplicateVariant(id));
		}

		let variant = Variant::new(id, role, tracks, &self.config)?;
		debug!(variant = %variant.id, tracks = variant.tracks.len(), "added variant");
		self.variants.push(variant);

		Ok(())
	}

	fn ensure_init(&self) -> Result<()> {
		match self.state {
			State::Init => Ok(()),
			State::Muxing => Err(Error::AlreadyStarted),
			State::Closed => Err(Error::Closed),
		}
	}

	fn variant_index(&self, id: &str) -> Result<usize> {
		self.variants
			.iter()
			.position(|variant| variant.id == id)
			.ok_or_else(|| Error::UnknownVariant(id.to_string()))
	}

	/// Push one sample through the pipeline. Any segments, parts or manifests
	/// it completes are persisted before this returns.
	pub fn write_sample(&mut self, variant_id: &str, sample: Sample) -> Result<()> {
		match self.state {
			State::Closed => return Err(Error::Closed),
			State::Init => self.start(),
			State::Muxing => {}
		}

		let vidx = self.variant_index(variant_id)?;
		let track_id = sample.track_id;

		let (processed, timescale) = {
			let variant = &mut self.variants[vidx];
			let ctx = variant
				.track_mut(track_id)
				.unwrap_or_else(|| panic!("unknown track id: {}", track_id));
			(ctx.processor.process(sample), ctx.track.timescale)
		};

		if self.anchor.is_none() {
			self.anchor = Some(Anchor {
				wall: processed.timestamp.unwrap_or_else(Utc::now),
				dts: processed.dts,
				timescale,
			});
		}

		self.maybe_store_init(vidx)?;

		let qidx = self.variant_queue[vidx];
		let key = TrackKey {
			variant: vidx,
			track: track_id,
		};
		let actions = self.queues[qidx].push(key, processed);
		self.apply(qidx, actions)?;

		self.maybe_store_master()
	}

	/// Insert a discontinuity into one variant's playlist, or all of them.
	///
	/// Buffered data is flushed first; the wall clock anchor resets so the
	/// next segment starts a fresh `EXT-X-PROGRAM-DATE-TIME` chain.
	pub fn add_discontinuity(&mut self, variant: Option<&str>) -> Result<()> {
		if self.state == State::Closed {
			return Err(Error::Closed);
		}

		if self.state == State::Muxing {
			for qidx in 0..self.queues.len() {
				let actions = self.queues[qidx].flush();
				self.apply(qidx, actions)?;
			}
			for queue in &mut self.queues {
				queue.reset();
			}
			self.maybe_store_master()?;
		}

		let targets: Vec<usize> = match variant {
			Some(id) => vec![self.variant_index(id)?],
			None => (0..self.variants.len()).collect(),
		};

		for vidx in targets {
			let variant = &mut self.variants[vidx];
			variant.playlist.add_discontinuity();
			variant.force_init = true;
			debug!(variant = %variant.id, "marked discontinuity");
		}

		self.anchor = None;
		Ok(())
	}

	/// Flush everything and append `EXT-X-ENDLIST` to the playlists.
	///
	/// Closing twice is a no-op; no further segments are produced.
	pub fn close(&mut self) -> Result<()> {
		match self.state {
			State::Closed => return Ok(()),
			State::Init => {
				self.state = State::Closed;
				return Ok(());
			}
			State::Muxing => {}
		}

		for qidx in 0..self.queues.len() {
			let actions = self.queues[qidx].flush();
			self.apply(qidx, actions)?;
		}

		for vidx in 0..self.variants.len() {
			if !self.variants[vidx].playlist.is_empty() {
				self.store_playlist(vidx, true)?;
			}
		}

		self.master_dirty = true;
		self.maybe_store_master()?;

		self.state = State::Closed;
		Ok(())
	}

	/// Build the queues and wire dependent variants to the lead variant.
	fn start(&mut self) {
		self.state = State::Muxing;

		let lead = self.variants.iter().position(Variant::has_video);
		self.variant_queue = vec![usize::MAX; self.variants.len()];

		let mut lead_queue = None;
		for (vidx, variant) in self.variants.iter().enumerate() {
			if !variant.has_video() && lead.is_some() {
				continue;
			}

			let mut queue = SampleQueue::new(self.config.segment_duration_ms);
			for ctx in &variant.tracks {
				queue.add_track(
					TrackKey {
						variant: vidx,
						track: ctx.track.id,
					},
					ctx.track.timescale,
					ctx.track.kind() == TrackKind::Video,
				);
			}

			self.variant_queue[vidx] = self.queues.len();
			if lead == Some(vidx) {
				lead_queue = Some(self.queues.len());
			}
			self.queues.push(queue);
		}

		// Variants without a video lead follow the lead variant's boundaries.
		for vidx in 0..self.variants.len() {
			if self.variant_queue[vidx] != usize::MAX {
				continue;
			}

			let qidx = lead_queue.expect("lead queue exists");
			for ctx in &self.variants[vidx].tracks {
				self.queues[qidx].add_track(
					TrackKey {
						variant: vidx,
						track: ctx.track.id,
					},
					ctx.track.timescale,
					false,
				);
			}
			self.variant_queue[vidx] = qidx;

			let lead_id = self.variants[lead.expect("lead exists")].id.clone();
			debug!(variant = %self.variants[vidx].id, lead = %lead_id, "sharing the lead variant's queue");
			self.variants[vidx].depends_on = Some(lead_id);
		}
	}

	fn apply(&mut self, qidx: usize, actions: Vec<QueueAction>) -> Result<()> {
		for action in actions {
			match action {
				QueueAction::Sample(key, sample) => self.route(key, sample)?,
				QueueAction::Flush => {
					for vidx in 0..self.variants.len() {
						if self.variant_queue[vidx] == qidx {
							self.flush_variant(vidx)?;
						}
					}
				}
			}
		}

		Ok(())
	}

	fn route(&mut self, key: TrackKey, sample: MediaSample) -> Result<()> {
		let groups = {
			let variant = &mut self.variants[key.variant];
			let ctx = variant.track_mut(key.track).expect("routed to unknown track");
			ctx.ticks_in_segment += sample.duration;
			ctx.first_dts.get_or_insert(sample.dts);

			match &mut variant.part_queue {
				Some(queue) => queue.push(sample),
				None => {
					variant.muxer.push(sample);
					return Ok(());
				}
			}
		};

		for group in groups {
			self.emit_part(key.variant, group)?;
		}

		Ok(())
	}

	fn emit_part(&mut self, vidx: usize, group: PartGroup) -> Result<()> {
		let (bytes, name, duration, id) = {
			let variant = &mut self.variants[vidx];
			let duration = part_duration(variant, &group);

			for (_, samples) in group.tracks {
				for sample in samples {
					variant.muxer.push(sample);
				}
			}

			let Some(bytes) = variant.muxer.fragment() else {
				return Ok(());
			};

			let name = format!(
				"segment_{}_part_{}.m4s",
				variant.playlist.next_index(),
				variant.playlist.pending_parts().len()
			);
			(bytes, name, duration, variant.id.clone())
		};

		let uri = self.storage.store_part(&id, &name, &bytes)?;
		debug!(variant = %id, uri = %uri, duration, "stored part");

		self.variants[vidx].playlist.add_part(uri, duration);
		self.store_playlist(vidx, false)?;

		if let Some(callback) = self.config.on_part_created.as_mut() {
			let variant = &self.variants[vidx];
			if let Some(part) = variant.playlist.pending_parts().last() {
				callback(&variant.id, part);
			}
		}

		Ok(())
	}

	fn flush_variant(&mut self, vidx: usize) -> Result<()> {
		// Whatever the part queue still holds becomes the segment's tail.
		{
			let variant = &mut self.variants[vidx];
			if let Some(queue) = &mut variant.part_queue {
				for (_, samples) in queue.drain() {
					for sample in samples {
						variant.muxer.push(sample);
					}
				}
			}
		}

		let Some(bytes) = self.variants[vidx].muxer.flush_segment() else {
			return Ok(());
		};

		let index = self.variants[vidx].playlist.next_index();
		let name = format!("segment_{}.{}", index, self.config.segment_kind.extension());
		let id = self.variants[vidx].id.clone();
		let uri = self.storage.store_segment(&id, &name, &bytes)?;

		let duration = self.variants[vidx].segment_duration();
		let timestamp = self.segment_timestamp(vidx);
		debug!(variant = %id, uri = %uri, duration, bytes = bytes.len(), "stored segment");

		let segment = Segment {
			index,
			uri,
			size: bytes.len() as u64,
			duration,
			timestamp,
			media_init: None,
			discontinuity: false,
			parts: Vec::new(),
		};

		let evicted = self.variants[vidx].playlist.add_segment(segment);
		if let Some(old) = evicted.segment {
			debug!(variant = %id, uri = %old.uri, "evicting segment");
			self.storage.delete_segment(&id, &old)?;
		}

		self.store_playlist(vidx, false)?;

		if let Some(callback) = self.config.on_segment_created.as_mut() {
			let variant = &self.variants[vidx];
			if let Some(segment) = variant.playlist.segments().last() {
				callback(&variant.id, segment);
			}
		}

		self.variants[vidx].reset_segment_accounting();
		self.master_dirty = true;
		Ok(())
	}

	/// Store a fresh init header when the codec configuration appears, changes,
	/// or a discontinuity forces a rotation.
	fn maybe_store_init(&mut self, vidx: usize) -> Result<()> {
		if self.config.segment_kind.container() != ContainerKind::Cmaf {
			return Ok(());
		}

		let (bytes, name, generation, id) = {
			let variant = &self.variants[vidx];
			if !variant.ready() {
				return Ok(());
			}

			let generation = variant.generation();
			if variant.init_generation == Some(generation) && !variant.force_init {
				return Ok(());
			}

			let Some(bytes) = variant.build_init() else {
				return Ok(());
			};

			(
				bytes,
				format!("init_{}.mp4", variant.init_count),
				generation,
				variant.id.clone(),
			)
		};

		let uri = self.storage.store_init_header(&id, &name, &bytes)?;
		debug!(variant = %id, uri = %uri, "stored init header");

		let variant = &mut self.variants[vidx];
		variant.playlist.add_init_header(uri);
		variant.init_count += 1;
		variant.init_generation = Some(generation);
		variant.force_init = false;

		Ok(())
	}

	fn store_playlist(&mut self, vidx: usize, end_list: bool) -> Result<()> {
		let low_latency = self.config.segment_kind.low_latency();

		let reports = if low_latency {
			self.rendition_reports(vidx)
		} else {
			Vec::new()
		};

		let (bytes, id) = {
			let variant = &self.variants[vidx];

			let preload_hint = (low_latency && !end_list).then(|| {
				format!(
					"segment_{}_part_{}.m4s",
					variant.playlist.next_index(),
					variant.playlist.pending_parts().len()
				)
			});

			let ctx = MediaContext {
				version: self.config.segment_kind.version(),
				vod: self.config.mode == WriterMode::Vod,
				end_list,
				low_latency,
				can_block_reload: self.config.server_control.can_block_reload,
				preload_hint,
				reports: &reports,
			};

			(render_media(&variant.playlist, &ctx), variant.id.clone())
		};

		let uri = self.storage.store_playlist(&id, &bytes)?;
		self.variants[vidx].playlist_uri = Some(uri);

		Ok(())
	}

	fn rendition_reports(&self, vidx: usize) -> Vec<RenditionReport> {
		let mut reports = Vec::new();

		for (index, variant) in self.variants.iter().enumerate() {
			if index == vidx {
				continue;
			}
			let Some(uri) = &variant.playlist_uri else { continue };
			let Some((last_msn, last_part)) = variant.playlist.last_part() else {
				continue;
			};

			reports.push(RenditionReport {
				uri: format!("../{}", uri),
				last_msn,
				last_part,
			});
		}

		reports
	}

	fn segment_timestamp(&self, vidx: usize) -> Option<DateTime<Utc>> {
		let anchor = self.anchor.as_ref()?;
		let variant = &self.variants[vidx];

		let first_ms = variant
			.tracks
			.iter()
			.filter_map(|ctx| ctx.first_dts.map(|dts| rescale(dts, ctx.track.timescale, 1000)))
			.max()?;
		let base_ms = rescale(anchor.dts, anchor.timescale, 1000);

		Some(anchor.wall + chrono::Duration::milliseconds(first_ms as i64 - base_ms as i64))
	}

	fn maybe_store_master(&mut self) -> Result<()> {
		if self.config.kind != WriterKind::Master || !self.master_dirty {
			return Ok(());
		}

		// Aggregate rendition groups: peak/average bandwidth and codecs.
		let mut groups: HashMap<&str, (u64, u64, Vec<String>)> = HashMap::new();
		for variant in &self.variants {
			let VariantRole::Rendition { group_id, .. } = &variant.role else {
				continue;
			};
			if variant.playlist.is_empty() {
				continue;
			}

			let (average, peak) = variant.playlist.bandwidth();
			let entry = groups.entry(group_id).or_default();
			entry.0 = entry.0.max(peak);
			entry.1 = entry.1.max(average);
			for codec in variant.codec_strings() {
				if !entry.2.contains(&codec) {
					entry.2.push(codec);
				}
			}
		}

		let mut streams = Vec::new();
		for variant in &self.variants {
			let VariantRole::Stream { audio, subtitles } = &variant.role else {
				continue;
			};
			let Some(uri) = &variant.playlist_uri else { continue };
			if variant.playlist.is_empty() {
				continue;
			}

			let (mut average, mut bandwidth) = variant.playlist.bandwidth();
			let mut codecs = variant.codec_strings();

			// A referenced audio group contributes its own bandwidth and codecs.
			if let Some(group) = audio {
				if let Some((peak, avg, group_codecs)) = groups.get(group.as_str()) {
					bandwidth += peak;
					average += avg;
					for codec in group_codecs {
						if !codecs.contains(codec) {
							codecs.push(codec.clone());
						}
					}
				}
			}

			streams.push(MasterStream {
				uri: uri.clone(),
				bandwidth,
				average_bandwidth: average,
				codecs,
				resolution: variant.resolution(),
				audio: audio.clone(),
				subtitles: subtitles.clone(),
			});
		}

		if streams.is_empty() {
			return Ok(());
		}

		let mut renditions = Vec::new();
		for variant in &self.variants {
			let VariantRole::Rendition {
				group_id,
				name,
				language,
				default,
				auto_select,
			} = &variant.role
			else {
				continue;
			};
			let Some(uri) = &variant.playlist_uri else { continue };

			renditions.push(MasterRendition {
				uri: uri.clone(),
				group_id: group_id.clone(),
				name: name.clone(),
				language: language.clone(),
				default: *default,
				auto_select: *auto_select,
			});
		}

		let bytes = render_master(self.config.segment_kind.version(), &streams, &renditions);
		self.storage.store_master_playlist(&bytes)?;
		self.master_dirty = false;

		Ok(())
	}
}

/// Part duration in seconds: the lead track's ticks, or the maximum across
/// tracks when no lead exists.
fn part_duration(variant: &Variant, group: &PartGroup) -> f64 {
	let lead = variant.lead().map(|ctx| ctx.track.id);

	let duration = |id: u32, samples: &[MediaSample]| {
		let ticks: u64 = samples.iter().map(|sample| sample.duration).sum();
		let timescale = variant.track(id).map(|ctx| ctx.track.timescale).unwrap_or(1);
		ticks as f64 / timescale as f64
	};

	if let Some(lead) = lead {
		if let Some((id, samples)) = group.tracks.iter().find(|(id, _)| *id == lead) {
			return duration(*id, samples);
		}
	}

	group
		.tracks
		.iter()
		.map(|(id, samples)| duration(*id, samples))
		.fold(0.0, f64::max)
}
