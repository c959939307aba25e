//! Files attached to a message before it is sent.

use std::path::Path;

use bytes::Bytes;

use crate::endpoints::{Upload, mime_for_name};
use crate::error::{Error, Result};
use crate::types::FileRef;

/// Broad class of an attachment, used for display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Other,
}

/// An attachment waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAttachment {
    /// Identifier used to remove the attachment before sending.
    pub id: String,
    /// File name.
    pub name: String,
    /// Lower-case extension.
    pub kind: String,
    /// Size in bytes.
    pub size: u64,
    /// Remote location, for attachments restored from a stored message.
    pub url: Option<String>,
    /// MIME type, when known.
    pub mime: Option<String>,
    /// Contents, present only for files read by this process.
    pub bytes: Option<Bytes>,
}

impl PendingAttachment {
    /// Create an attachment from in-memory contents.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        Self {
            id: new_id(),
            kind: extension(&name),
            size: bytes.len() as u64,
            url: None,
            mime: mime_for_name(&name).map(String::from),
            name,
            bytes: Some(bytes),
        }
    }

    /// Read an attachment from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::validation(format!("{} is not a file", path.display()), None))?;
        Ok(Self::new(name, bytes))
    }

    /// Recreate an attachment from a sent message's file reference.
    ///
    /// `bytes` is whatever this process still holds for it.
    pub fn restored(file: &FileRef, bytes: Option<Bytes>) -> Self {
        Self {
            id: new_id(),
            name: file.name.clone(),
            kind: file.kind.clone(),
            size: file.size,
            url: file.url.clone(),
            mime: mime_for_name(&file.name).map(String::from),
            bytes,
        }
    }

    /// Size in megabytes with two decimals, e.g. `0.50 MB`.
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size as f64 / (1024.0 * 1024.0))
    }

    /// Broad class of this attachment.
    pub fn category(&self) -> AttachmentKind {
        match self.kind.as_str() {
            "jpg" | "jpeg" | "png" | "webp" => AttachmentKind::Image,
            "pdf" => AttachmentKind::Pdf,
            _ => AttachmentKind::Other,
        }
    }

    /// Returns true if the contents can be uploaded.
    pub fn has_bytes(&self) -> bool {
        self.bytes.is_some()
    }

    /// The reference stored in the message.
    pub fn to_file_ref(&self) -> FileRef {
        FileRef {
            name: self.name.clone(),
            kind: self.kind.clone(),
            size: self.size,
            url: self.url.clone(),
        }
    }

    /// The upload for this attachment, if its contents are held.
    pub fn to_upload(&self) -> Option<Upload> {
        self.bytes
            .as_ref()
            .map(|bytes| Upload::new(self.name.clone(), self.mime.clone(), bytes.clone()))
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_labels() {
        let photo = PendingAttachment::new("Cat.PNG", vec![0u8; 512 * 1024]);
        assert_eq!(photo.kind, "png");
        assert_eq!(photo.category(), AttachmentKind::Image);
        assert_eq!(photo.size_label(), "0.50 MB");
        assert_eq!(photo.mime.as_deref(), Some("image/png"));

        assert_eq!(PendingAttachment::new("a.pdf", Bytes::new()).category(), AttachmentKind::Pdf);
        let notes = PendingAttachment::new("README", &b"x"[..]);
        assert_eq!(notes.kind, "");
        assert_eq!(notes.category(), AttachmentKind::Other);
    }

    #[test]
    fn file_ref_round_trip_keeps_metadata() {
        let original = PendingAttachment::new("report.pdf", &b"%PDF-1.7"[..]);
        let file = original.to_file_ref();
        assert_eq!(file, FileRef::new("report.pdf", "pdf", 8));

        let restored = PendingAttachment::restored(&file, original.bytes.clone());
        assert_ne!(restored.id, original.id);
        assert!(restored.to_upload().is_some());
        assert!(PendingAttachment::restored(&file, None).to_upload().is_none());
    }

    #[tokio::test]
    async fn reads_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "parley-attachment-{}.txt",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, b"hello").await.unwrap();
        let attachment = PendingAttachment::from_path(&path).await.unwrap();
        assert_eq!(attachment.size, 5);
        assert_eq!(attachment.kind, "txt");
        let _ = tokio::fs::remove_file(&path).await;

        assert!(PendingAttachment::from_path("/definitely/not/here.png").await.is_err());
    }
}
