use m3u8_rs::{AlternativeMedia, AlternativeMediaType, MasterPlaylist, Resolution, VariantStream};

/// One `EXT-X-STREAM-INF` entry.
pub(crate) struct MasterStream {
	pub uri: String,
	/// Peak bits per second, own tracks plus the referenced audio group.
	pub bandwidth: u64,
	pub average_bandwidth: u64,
	/// Unique codec strings across own tracks and referenced renditions.
	pub codecs: Vec<String>,
	pub resolution: Option<(u32, u32)>,
	pub audio: Option<String>,
	pub subtitles: Option<String>,
}

/// One `EXT-X-MEDIA` entry.
pub(crate) struct MasterRendition {
	pub uri: String,
	pub group_id: String,
	pub name: String,
	pub language: Option<String>,
	pub default: bool,
	pub auto_select: bool,
}

/// Serialize the multivariant playlist.
pub(crate) fn render_master(version: u8, streams: &[MasterStream], renditions: &[MasterRendition]) -> Vec<u8> {
	let playlist = MasterPlaylist {
		version: Some(version as usize),
		independent_segments: true,
		alternatives: renditions
			.iter()
			.map(|rendition| AlternativeMedia {
				media_type: AlternativeMediaType::Audio,
				uri: Some(rendition.uri.clone()),
				group_id: rendition.group_id.clone(),
				name: rendition.name.clone(),
				language: rendition.language.clone(),
				default: rendition.default,
				autoselect: rendition.auto_select,
				..Default::default()
			})
			.collect(),
		variants: streams
			.iter()
			.map(|stream| VariantStream {
				is_i_frame: false,
				uri: stream.uri.clone(),
				bandwidth: stream.bandwidth,
				average_bandwidth: Some(stream.average_bandwidth),
				codecs: Some(stream.codecs.join(",")),
				resolution: stream.resolution.map(|(width, height)| Resolution {
					width: width as u64,
					height: height as u64,
				}),
				frame_rate: None,
				hdcp_level: None,
				audio: stream.audio.clone(),
				video: None,
				subtitles: stream.subtitles.clone(),
				closed_captions: None,
				other_attributes: None,
			})
			.collect(),
		..Default::default()
	};

	let mut out = Vec::with_capacity(512);
	playlist.write_to(&mut out).expect("writing to a Vec cannot fail");
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_master_layout() {
		let streams = [MasterStream {
			uri: "video/playlist.m3u8".into(),
			bandwidth: 1_500_000,
			average_bandwidth: 1_200_000,
			codecs: vec!["avc1.64001F".into(), "mp4a.40.2".into()],
			resolution: Some((1280, 720)),
			audio: Some("audio-group".into()),
			subtitles: None,
		}];
		let renditions = [MasterRendition {
			uri: "audio/playlist.m3u8".into(),
			group_id: "audio-group".into(),
			name: "English".into(),
			language: Some("en".into()),
			default: true,
			auto_select: true,
		}];

		let out = render_master(7, &streams, &renditions);
		let text = std::str::from_utf8(&out).unwrap();

		assert!(text.starts_with("#EXTM3U\n"));
		assert!(text.contains("#EXT-X-VERSION:7"));
		assert!(text.contains("#EXT-X-INDEPENDENT-SEGMENTS"));
		assert!(text.contains("TYPE=AUDIO"));
		assert!(text.contains("GROUP-ID=\"audio-group\""));
		assert!(text.contains("BANDWIDTH=1500000"));
		assert!(text.contains("AVERAGE-BANDWIDTH=1200000"));
		assert!(text.contains("avc1.64001F,mp4a.40.2"));
		assert!(text.contains("RESOLUTION=1280x720"));
		assert!(text.contains("AUDIO=\"audio-group\""));
		assert!(text.contains("video/playlist.m3u8"));
	}
}
