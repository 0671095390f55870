use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use uuid::Uuid;

use crate::workflow::DocumentStore;

/// Content-addressable document storage on S3/MinIO, keyed
/// `{candidateId}/{fileName}`. Puts are plain overwrites, so retrying an
/// interrupted upload is always safe.
#[derive(Clone)]
pub struct BlobStore {
    s3: S3Client,
    bucket: String,
}

impl BlobStore {
    pub fn new(s3: S3Client, bucket: String) -> Self {
        BlobStore { s3, bucket }
    }

    fn key(candidate_id: Uuid, file_name: &str) -> String {
        format!("{candidate_id}/{file_name}")
    }

    pub async fn put(
        &self,
        candidate_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<()> {
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(candidate_id, file_name))
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;
        Ok(())
    }

    /// Returns None when the object does not exist.
    pub async fn get(&self, candidate_id: Uuid, file_name: &str) -> anyhow::Result<Option<Bytes>> {
        let result = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(candidate_id, file_name))
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| anyhow::anyhow!("S3 body read failed: {e}"))?;
                Ok(Some(data.into_bytes()))
            }
            Err(err) => {
                if err.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
                    Ok(None)
                } else {
                    Err(anyhow::anyhow!("S3 fetch failed: {err}"))
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for BlobStore {
    async fn fetch(&self, candidate_id: Uuid, file_name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .get(candidate_id, file_name)
            .await?
            .map(|bytes| bytes.to_vec()))
    }
}

/// Content type for download responses, inferred from the file extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_keys_nest_file_under_candidate() {
        let id = Uuid::nil();
        assert_eq!(
            BlobStore::key(id, "resume.pdf"),
            "00000000-0000-0000-0000-000000000000/resume.pdf"
        );
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("cv.pdf"), "application/pdf");
        assert_eq!(content_type_for("cv.PDF"), "application/pdf");
        assert_eq!(
            content_type_for("cv.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(content_type_for("cv.txt"), "text/plain");
        assert_eq!(content_type_for("cv"), "application/octet-stream");
    }
}
