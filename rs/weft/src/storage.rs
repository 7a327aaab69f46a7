use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::trace;

use crate::playlist::Segment;

/// Where the writer persists manifests and payloads.
///
/// Every call is synchronous and returns the resolved uri, which is used
/// verbatim in the manifests. Errors are surfaced to the caller of the write
/// that triggered them; the writer never retries.
pub trait Storage {
	fn store_master_playlist(&mut self, data: &[u8]) -> io::Result<()>;

	/// Returns the uri of the variant playlist, relative to the master playlist.
	fn store_playlist(&mut self, variant: &str, data: &[u8]) -> io::Result<String>;

	/// Returns the uri of the init header, relative to the variant playlist.
	fn store_init_header(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String>;

	/// Returns the uri of the segment, relative to the variant playlist.
	fn store_segment(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String>;

	/// Returns the uri of the part, relative to the variant playlist.
	fn store_part(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String>;

	/// Delete a segment that scrolled out of the window, parts included.
	fn delete_segment(&mut self, variant: &str, segment: &Segment) -> io::Result<()>;
}

/// Storage keeping everything in memory. Handy for tests and for hosts that
/// serve the artifacts straight out of process.
#[derive(Default)]
pub struct MemoryStorage {
	pub master: Option<Bytes>,
	pub playlists: HashMap<String, Bytes>,
	pub objects: HashMap<String, Bytes>,
	pub deleted: Vec<String>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	fn insert(&mut self, variant: &str, name: &str, data: &[u8]) -> String {
		self.objects
			.insert(format!("{}/{}", variant, name), Bytes::copy_from_slice(data));
		name.to_string()
	}

	pub fn object(&self, variant: &str, name: &str) -> Option<&Bytes> {
		self.objects.get(&format!("{}/{}", variant, name))
	}

	pub fn playlist(&self, variant: &str) -> Option<&Bytes> {
		self.playlists.get(variant)
	}
}

impl Storage for MemoryStorage {
	fn store_master_playlist(&mut self, data: &[u8]) -> io::Result<()> {
		self.master = Some(Bytes::copy_from_slice(data));
		Ok(())
	}

	fn store_playlist(&mut self, variant: &str, data: &[u8]) -> io::Result<String> {
		self.playlists.insert(variant.to_string(), Bytes::copy_from_slice(data));
		Ok(format!("{}/playlist.m3u8", variant))
	}

	fn store_init_header(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		Ok(self.insert(variant, name, data))
	}

	fn store_segment(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		Ok(self.insert(variant, name, data))
	}

	fn store_part(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		Ok(self.insert(variant, name, data))
	}

	fn delete_segment(&mut self, variant: &str, segment: &Segment) -> io::Result<()> {
		self.objects.remove(&format!("{}/{}", variant, segment.uri));
		for part in &segment.parts {
			self.objects.remove(&format!("{}/{}", variant, part.uri));
		}
		self.deleted.push(format!("{}/{}", variant, segment.uri));
		Ok(())
	}
}

/// Storage writing `{dir}/{variant}/{resource}`, the layout a plain HTTP
/// server can serve directly.
pub struct DirStorage {
	dir: PathBuf,
}

impl DirStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	fn write(&self, variant: &str, name: &str, data: &[u8]) -> io::Result<()> {
		let dir = self.dir.join(variant);
		fs::create_dir_all(&dir)?;

		let path = dir.join(name);
		trace!(path = %path.display(), bytes = data.len(), "storing");
		fs::write(path, data)
	}
}

impl Storage for DirStorage {
	fn store_master_playlist(&mut self, data: &[u8]) -> io::Result<()> {
		fs::create_dir_all(&self.dir)?;
		fs::write(self.dir.join("master.m3u8"), data)
	}

	fn store_playlist(&mut self, variant: &str, data: &[u8]) -> io::Result<String> {
		self.write(variant, "playlist.m3u8", data)?;
		Ok(format!("{}/playlist.m3u8", variant))
	}

	fn store_init_header(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		self.write(variant, name, data)?;
		Ok(name.to_string())
	}

	fn store_segment(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		self.write(variant, name, data)?;
		Ok(name.to_string())
	}

	fn store_part(&mut self, variant: &str, name: &str, data: &[u8]) -> io::Result<String> {
		self.write(variant, name, data)?;
		Ok(name.to_string())
	}

	fn delete_segment(&mut self, variant: &str, segment: &Segment) -> io::Result<()> {
		let dir = self.dir.join(variant);

		for part in &segment.parts {
			// Part files may already be gone; that is fine.
			let _ = fs::remove_file(dir.join(&part.uri));
		}

		match fs::remove_file(dir.join(&segment.uri)) {
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn segment(uri: &str) -> Segment {
		Segment {
			index: 0,
			uri: uri.to_string(),
			size: 4,
			duration: 2.0,
			timestamp: None,
			media_init: None,
			discontinuity: false,
			parts: Vec::new(),
		}
	}

	#[test]
	fn test_memory_round_trip() {
		let mut storage = MemoryStorage::new();

		let uri = storage.store_segment("video", "segment_0.m4s", &[1, 2, 3, 4]).unwrap();
		assert_eq!(uri, "segment_0.m4s");
		assert_eq!(storage.object("video", "segment_0.m4s").unwrap().as_ref(), &[1, 2, 3, 4]);

		storage.delete_segment("video", &segment("segment_0.m4s")).unwrap();
		assert!(storage.object("video", "segment_0.m4s").is_none());
		assert_eq!(storage.deleted, vec!["video/segment_0.m4s"]);
	}

	#[test]
	fn test_dir_layout() {
		let dir = tempfile::tempdir().unwrap();
		let mut storage = DirStorage::new(dir.path());

		storage.store_segment("video", "segment_0.m4s", &[1, 2, 3]).unwrap();
		storage.store_playlist("video", b"#EXTM3U\n").unwrap();
		storage.store_master_playlist(b"#EXTM3U\n").unwrap();

		assert!(dir.path().join("video/segment_0.m4s").exists());
		assert!(dir.path().join("video/playlist.m3u8").exists());
		assert!(dir.path().join("master.m3u8").exists());

		storage.delete_segment("video", &segment("segment_0.m4s")).unwrap();
		assert!(!dir.path().join("video/segment_0.m4s").exists());

		// Deleting twice is not an error.
		storage.delete_segment("video", &segment("segment_0.m4s")).unwrap();
	}
}
