use std::fmt::Write;

use chrono::SecondsFormat;

use super::Playlist;

/// Cross-variant state for `EXT-X-RENDITION-REPORT`.
pub(crate) struct RenditionReport {
	pub uri: String,
	pub last_msn: u64,
	pub last_part: u64,
}

/// Everything outside the per-variant window state that the media playlist needs.
pub(crate) struct MediaContext<'a> {
	pub version: u8,
	pub vod: bool,
	pub end_list: bool,
	pub low_latency: bool,
	pub can_block_reload: bool,
	/// Uri of the next expected part, for `EXT-X-PRELOAD-HINT`.
	pub preload_hint: Option<String>,
	pub reports: &'a [RenditionReport],
}

/// Serialize a media playlist per RFC 8216 plus the LL-HLS extension tags.
pub(crate) fn render_media(playlist: &Playlist, ctx: &MediaContext) -> Vec<u8> {
	let mut out = String::with_capacity(1024);

	out.push_str("#EXTM3U\n");
	let _ = writeln!(out, "#EXT-X-VERSION:{}", ctx.version);
	let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", playlist.target_duration());
	let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", playlist.media_sequence());
	let _ = writeln!(out, "#EXT-X-DISCONTINUITY-SEQUENCE:{}", playlist.discontinuity_sequence());

	if ctx.vod {
		out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
	}

	if ctx.low_latency {
		// PART-HOLD-BACK must be at least twice the part target; three is
		// the value the reference players settle on.
		out.push_str("#EXT-X-SERVER-CONTROL:");
		if ctx.can_block_reload {
			out.push_str("CAN-BLOCK-RELOAD=YES,");
		}
		let _ = writeln!(out, "PART-HOLD-BACK={:.3}", playlist.part_target() * 3.0);
		let _ = writeln!(out, "#EXT-X-PART-INF:PART-TARGET={:.3}", playlist.part_target());
	} else if ctx.can_block_reload {
		out.push_str("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES\n");
	}

	for segment in playlist.segments() {
		if segment.discontinuity {
			out.push_str("#EXT-X-DISCONTINUITY\n");
		}

		if let Some(init) = &segment.media_init {
			let _ = writeln!(out, "#EXT-X-MAP:URI=\"{}\"", init);
		}

		if let Some(timestamp) = segment.timestamp {
			let _ = writeln!(
				out,
				"#EXT-X-PROGRAM-DATE-TIME:{}",
				timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
			);
		}

		for part in &segment.parts {
			write_part(&mut out, &part.uri, part.duration, part.index == 0);
		}

		let _ = writeln!(out, "#EXTINF:{:.3},", segment.duration);
		out.push_str(&segment.uri);
		out.push('\n');
	}

	// Parts of the still-open segment.
	for part in playlist.pending_parts() {
		write_part(&mut out, &part.uri, part.duration, part.index == 0);
	}

	if ctx.low_latency && !ctx.end_list {
		if let Some(hint) = &ctx.preload_hint {
			let _ = writeln!(out, "#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"{}\"", hint);
		}
	}

	for report in ctx.reports {
		let _ = writeln!(
			out,
			"#EXT-X-RENDITION-REPORT:URI=\"{}\",LAST-MSN={},LAST-PART={}",
			report.uri, report.last_msn, report.last_part
		);
	}

	if ctx.end_list {
		out.push_str("#EXT-X-ENDLIST\n");
	}

	out.into_bytes()
}

fn write_part(out: &mut String, uri: &str, duration: f64, independent: bool) {
	let _ = write!(out, "#EXT-X-PART:DURATION={:.3},URI=\"{}\"", duration, uri);
	if independent {
		out.push_str(",INDEPENDENT=YES");
	}
	out.push('\n');
}

#[cfg(test)]
mod tests {
	use super::super::Segment;
	use super::*;

	fn context() -> MediaContext<'static> {
		MediaContext {
			version: 7,
			vod: false,
			end_list: false,
			low_latency: false,
			can_block_reload: false,
			preload_hint: None,
			reports: &[],
		}
	}

	fn segment(index: u64, duration: f64) -> Segment {
		Segment {
			index,
			uri: format!("segment_{}.m4s", index),
			size: 1000,
			duration,
			timestamp: None,
			media_init: None,
			discontinuity: false,
			parts: Vec::new(),
		}
	}

	#[test]
	fn test_basic_playlist() {
		let mut playlist = Playlist::new(0);
		playlist.add_init_header("init_0.mp4".into());
		playlist.add_segment(segment(0, 2.0));
		playlist.add_segment(segment(1, 1.5));

		let out = render_media(&playlist, &context());
		let text = std::str::from_utf8(&out).unwrap();

		assert!(text.starts_with("#EXTM3U\n#EXT-X-VERSION:7\n"));
		assert!(text.contains("#EXT-X-TARGETDURATION:2\n"));
		assert!(text.contains("#EXT-X-MAP:URI=\"init_0.mp4\"\n"));
		assert!(text.contains("#EXTINF:2.000,\nsegment_0.m4s\n"));
		assert!(text.contains("#EXTINF:1.500,\nsegment_1.m4s\n"));
		assert!(!text.contains("#EXT-X-ENDLIST"));
	}

	#[test]
	fn test_end_list_and_vod() {
		let mut playlist = Playlist::new(0);
		playlist.add_segment(segment(0, 2.0));

		let mut ctx = context();
		ctx.vod = true;
		ctx.end_list = true;

		let out = render_media(&playlist, &ctx);
		let text = std::str::from_utf8(&out).unwrap();

		assert!(text.contains("#EXT-X-PLAYLIST-TYPE:VOD\n"));
		assert!(text.ends_with("#EXT-X-ENDLIST\n"));
	}

	#[test]
	fn test_low_latency_tags() {
		let mut playlist = Playlist::new(0);
		playlist.add_part("segment_0_part_0.m4s".into(), 0.3);
		playlist.add_part("segment_0_part_1.m4s".into(), 0.3);

		let mut ctx = context();
		ctx.version = 9;
		ctx.low_latency = true;
		ctx.can_block_reload = true;
		ctx.preload_hint = Some("segment_0_part_2.m4s".into());

		let out = render_media(&playlist, &ctx);
		let text = std::str::from_utf8(&out).unwrap();

		assert!(text.contains("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=0.900\n"));
		assert!(text.contains("#EXT-X-PART-INF:PART-TARGET=0.300\n"));
		assert!(text.contains("#EXT-X-PART:DURATION=0.300,URI=\"segment_0_part_0.m4s\",INDEPENDENT=YES\n"));
		assert!(text.contains("#EXT-X-PART:DURATION=0.300,URI=\"segment_0_part_1.m4s\"\n"));
		assert!(text.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"segment_0_part_2.m4s\"\n"));
	}

	#[test]
	fn test_rendition_reports() {
		let mut playlist = Playlist::new(0);
		playlist.add_segment(segment(0, 2.0));

		let reports = [RenditionReport {
			uri: "../audio/playlist.m3u8".into(),
			last_msn: 4,
			last_part: 2,
		}];

		let mut ctx = context();
		ctx.reports = &reports;

		let out = render_media(&playlist, &ctx);
		let text = std::str::from_utf8(&out).unwrap();

		assert!(text.contains("#EXT-X-RENDITION-REPORT:URI=\"../audio/playlist.m3u8\",LAST-MSN=4,LAST-PART=2\n"));
	}
}
