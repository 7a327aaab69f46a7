use bytes::Bytes;

use crate::codec::Codec;
use crate::config::WriterConfig;
use crate::model::{Track, TrackKind};
use crate::mux::{CmafMuxer, ContainerKind, InitTrack, SampleEntry, TracksMuxer, TsMuxer};
use crate::playlist::Playlist;
use crate::process::SampleProcessor;
use crate::queue::PartQueue;
use crate::{Error, Result, TrackId};

/// Describes one `EXT-X-STREAM-INF` variant.
#[derive(Debug, Clone)]
pub struct VariantConfig {
	pub id: String,
	pub tracks: Vec<Track>,

	/// Referenced audio rendition group.
	pub audio: Option<String>,

	/// Referenced subtitles group, carried through to the master playlist.
	pub subtitles: Option<String>,
}

impl VariantConfig {
	pub fn new(id: impl Into<String>, tracks: Vec<Track>) -> Self {
		Self {
			id: id.into(),
			tracks,
			audio: None,
			subtitles: None,
		}
	}

	pub fn with_audio(mut self, group: impl Into<String>) -> Self {
		self.audio = Some(group.into());
		self
	}

	pub fn with_subtitles(mut self, group: impl Into<String>) -> Self {
		self.subtitles = Some(group.into());
		self
	}
}

/// Describes one `EXT-X-MEDIA` alternate rendition.
#[derive(Debug, Clone)]
pub struct RenditionConfig {
	pub id: String,
	pub tracks: Vec<Track>,
	pub group_id: String,
	pub name: String,
	pub language: Option<String>,
	pub default: bool,
	pub auto_select: bool,
}

impl RenditionConfig {
	pub fn new(id: impl Into<String>, tracks: Vec<Track>, group_id: impl Into<String>) -> Self {
		let id = id.into();
		Self {
			name: id.clone(),
			id,
			tracks,
			group_id: group_id.into(),
			language: None,
			default: false,
			auto_select: true,
		}
	}

	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = Some(language.into());
		self
	}

	pub fn with_default(mut self, default: bool) -> Self {
		self.default = default;
		self
	}
}

/// How the variant appears in the master playlist.
pub(crate) enum VariantRole {
	Stream {
		audio: Option<String>,
		subtitles: Option<String>,
	},
	Rendition {
		group_id: String,
		name: String,
		language: Option<String>,
		default: bool,
		auto_select: bool,
	},
}

pub(crate) struct TrackContext {
	pub track: Track,
	pub processor: SampleProcessor,

	/// Decode ticks accumulated in the open segment.
	pub ticks_in_segment: u64,

	/// First dts seen in the open segment, for wall clock anchoring.
	pub first_dts: Option<u64>,
}

/// One variant or rendition: tracks, muxer and playlist state.
pub(crate) struct Variant {
	pub id: String,
	pub role: VariantRole,
	pub tracks: Vec<TrackContext>,
	pub muxer: TracksMuxer,
	pub playlist: Playlist,
	pub part_queue: Option<PartQueue>,

	/// Set when this variant's segmentation follows another variant's queue.
	pub depends_on: Option<String>,

	/// Counter for `init_{n}.mp4` resource names.
	pub init_count: u32,

	/// Processor generation the last stored init header was built from.
	pub init_generation: Option<u64>,

	/// Rotate the init header even without a config change (discontinuity).
	pub force_init: bool,

	/// Uri returned by the storage for this variant's playlist.
	pub playlist_uri: Option<String>,
}

impl Variant {
	pub fn new(id: String, role: VariantRole, tracks: Vec<Track>, config: &WriterConfig) -> Result<Self> {
		if tracks.is_empty() {
			return Err(Error::EmptyVariant);
		}

		for (index, track) in tracks.iter().enumerate() {
			if tracks[..index].iter().any(|other| other.id == track.id) {
				return Err(Error::DuplicateTrack(track.id));
			}
		}

		let container = config.segment_kind.container();

		let contexts = tracks
			.into_iter()
			.map(|track| {
				Ok(TrackContext {
					processor: SampleProcessor::new(&track, container)?,
					track,
					ticks_in_segment: 0,
					first_dts: None,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		let muxer: TracksMuxer = match container {
			ContainerKind::Cmaf => {
				CmafMuxer::new(contexts.iter().map(|ctx| (ctx.track.id, ctx.track.timescale))).into()
			}
			ContainerKind::MpegTs => TsMuxer::new(
				contexts
					.iter()
					.map(|ctx| (ctx.track.id, ctx.track.codec, ctx.track.timescale)),
			)
			.into(),
		};

		let part_queue = config.segment_kind.low_latency().then(|| {
			let mut queue = PartQueue::new(config.part_duration_ms);
			for ctx in &contexts {
				queue.add_track(ctx.track.id, ctx.track.timescale);
			}
			queue
		});

		Ok(Self {
			id,
			role,
			tracks: contexts,
			muxer,
			playlist: Playlist::new(config.max_segments),
			part_queue,
			depends_on: None,
			init_count: 0,
			init_generation: None,
			force_init: false,
			playlist_uri: None,
		})
	}

	pub fn track_mut(&mut self, id: TrackId) -> Option<&mut TrackContext> {
		self.tracks.iter_mut().find(|ctx| ctx.track.id == id)
	}

	pub fn track(&self, id: TrackId) -> Option<&TrackContext> {
		self.tracks.iter().find(|ctx| ctx.track.id == id)
	}

	pub fn has_video(&self) -> bool {
		self.tracks.iter().any(|ctx| ctx.track.kind() == TrackKind::Video)
	}

	/// The first video track, whose sync samples define segment boundaries.
	pub fn lead(&self) -> Option<&TrackContext> {
		self.tracks.iter().find(|ctx| ctx.track.kind() == TrackKind::Video)
	}

	/// Duration of the open segment in seconds: the lead track's tick count,
	/// or the maximum across tracks when no lead exists.
	pub fn segment_duration(&self) -> f64 {
		match self.lead() {
			Some(lead) => lead.ticks_in_segment as f64 / lead.track.timescale as f64,
			None => self
				.tracks
				.iter()
				.map(|ctx| ctx.ticks_in_segment as f64 / ctx.track.timescale as f64)
				.fold(0.0, f64::max),
		}
	}

	pub fn reset_segment_accounting(&mut self) {
		for ctx in &mut self.tracks {
			ctx.ticks_in_segment = 0;
			ctx.first_dts = None;
		}
	}

	/// Whether every track has the configuration the init header needs.
	pub fn ready(&self) -> bool {
		self.tracks.iter().all(|ctx| ctx.processor.ready())
	}

	/// Combined configuration generation, used to detect rotation.
	pub fn generation(&self) -> u64 {
		self.tracks.iter().map(|ctx| ctx.processor.generation()).sum()
	}

	/// Build the CMAF init header once every track is configured.
	pub fn build_init(&self) -> Option<Bytes> {
		let mut tracks = Vec::with_capacity(self.tracks.len());

		for ctx in &self.tracks {
			let processor = &ctx.processor;

			let entry = match processor.params()? {
				Codec::H264(params) => {
					let (sps, pps) = processor.avc_parameter_sets()?;
					SampleEntry::Avc {
						profile: params.profile,
						constraints: params.constraints,
						level: params.level,
						sps: sps.clone(),
						pps: pps.clone(),
					}
				}
				Codec::H265(params) => {
					let (vps, sps, pps) = processor.hevc_parameter_sets()?;
					SampleEntry::Hevc {
						params: *params,
						vps: vps.clone(),
						sps: sps.clone(),
						pps: pps.clone(),
					}
				}
				Codec::Aac(_) => SampleEntry::Aac {
					config: processor.aac_config()?,
				},
				Codec::Av1(params) => SampleEntry::Av1 {
					params: *params,
					sequence_header: processor.av1_sequence_header()?.clone(),
				},
			};

			tracks.push(InitTrack {
				id: ctx.track.id,
				timescale: ctx.track.timescale,
				width: processor.width().unwrap_or(0),
				height: processor.height().unwrap_or(0),
				entry,
			});
		}

		Some(crate::mux::init_segment(&tracks))
	}

	/// Codec strings of all configured tracks, in track order.
	pub fn codec_strings(&self) -> Vec<String> {
		self.tracks
			.iter()
			.filter_map(|ctx| ctx.processor.params().map(|params| params.to_string()))
			.collect()
	}

	/// Resolution of the lead video track, once known.
	pub fn resolution(&self) -> Option<(u32, u32)> {
		let lead = self.lead()?;
		Some((lead.processor.width()?, lead.processor.height()?))
	}
}
