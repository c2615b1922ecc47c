/// S3文書ストア
///
/// 原本PDFの取得、署名済みPDFの保存、閲覧用の署名付きURL発行を担当する。
///
/// 要件: 3.7, 6.1
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tracing::info;

/// 文書ストア操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// S3操作に失敗
    #[error("Storage error: {0}")]
    StorageError(String),

    /// 指定キーの文書が存在しない
    #[error("document not found: {0}")]
    NotFound(String),

    /// 署名付きURLの生成に失敗
    #[error("Presign error: {0}")]
    PresignError(String),
}

/// 文書ストア用トレイト
///
/// 異なる実装を可能にします（実際のS3、テスト用モック）。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// キーで文書を取得する
    async fn get(&self, key: &str) -> Result<Vec<u8>, DocumentStoreError>;

    /// 文書を保存する
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DocumentStoreError>;

    /// 閲覧用の署名付きGET URLを発行する
    ///
    /// 要件: 6.1
    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, DocumentStoreError>;
}

/// DocumentStoreのS3実装
#[derive(Debug, Clone)]
pub struct S3DocumentStore {
    /// S3クライアント
    client: S3Client,
    /// 文書バケット名
    bucket: String,
}

impl S3DocumentStore {
    /// 新しいS3DocumentStoreを作成
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl DocumentStore for S3DocumentStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, DocumentStoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(DocumentStoreError::NotFound(key.to_string()));
                }
                return Err(DocumentStoreError::StorageError(service_error.to_string()));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| DocumentStoreError::StorageError(e.to_string()))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), DocumentStoreError> {
        info!(bucket = %self.bucket, key = %key, size = bytes.len(), "文書保存");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| DocumentStoreError::StorageError(e.into_service_error().to_string()))?;

        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, DocumentStoreError> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| DocumentStoreError::PresignError(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| DocumentStoreError::PresignError(e.into_service_error().to_string()))?;

        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    // ==================== 3.7 / 6.1 文書ストアテスト ====================

    // エラー表示メッセージのテスト
    #[test]
    fn test_document_store_error_storage_error_display() {
        let error = DocumentStoreError::StorageError("access denied".to_string());
        assert_eq!(error.to_string(), "Storage error: access denied");
    }

    #[test]
    fn test_document_store_error_not_found_display() {
        let error = DocumentStoreError::NotFound("tenants/a/doc.pdf".to_string());
        assert_eq!(error.to_string(), "document not found: tenants/a/doc.pdf");
    }

    #[test]
    fn test_document_store_error_presign_error_display() {
        let error = DocumentStoreError::PresignError("invalid expiry".to_string());
        assert_eq!(error.to_string(), "Presign error: invalid expiry");
    }

    // ==================== モック文書ストア ====================

    /// ユニットテスト用のモックDocumentStore
    #[derive(Debug, Clone)]
    pub struct MockDocumentStore {
        /// 保存された文書: key -> bytes
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        /// 次の操作で返すエラー（エラーパスのテスト用）
        next_error: Arc<Mutex<Option<DocumentStoreError>>>,
    }

    impl MockDocumentStore {
        pub fn new() -> Self {
            Self {
                objects: Arc::new(Mutex::new(HashMap::new())),
                next_error: Arc::new(Mutex::new(None)),
            }
        }

        pub fn set_next_error(&self, error: DocumentStoreError) {
            *self.next_error.lock().unwrap() = Some(error);
        }

        pub fn insert_object(&self, key: &str, bytes: Vec<u8>) {
            self.objects.lock().unwrap().insert(key.to_string(), bytes);
        }

        pub fn get_object_sync(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(key).cloned()
        }

        pub fn object_count(&self) -> usize {
            self.objects.lock().unwrap().len()
        }

        fn take_error(&self) -> Option<DocumentStoreError> {
            self.next_error.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl DocumentStore for MockDocumentStore {
        async fn get(&self, key: &str) -> Result<Vec<u8>, DocumentStoreError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }

            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| DocumentStoreError::NotFound(key.to_string()))
        }

        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), DocumentStoreError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }

            self.objects.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }

        async fn presign_get(
            &self,
            key: &str,
            expires_in: Duration,
        ) -> Result<String, DocumentStoreError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }

            if !self.objects.lock().unwrap().contains_key(key) {
                return Err(DocumentStoreError::NotFound(key.to_string()));
            }
            Ok(format!(
                "https://documents.example.com/{key}?expires={}",
                expires_in.as_secs()
            ))
        }
    }

    // ==================== モックストアを使用したテスト ====================

    /// putした文書はgetで取り出せる
    #[tokio::test]
    async fn test_mock_store_put_then_get() {
        let store = MockDocumentStore::new();

        store
            .put("tenants/a/doc.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();

        let bytes = store.get("tenants/a/doc.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
        assert_eq!(store.object_count(), 1);
    }

    /// 存在しないキーはNotFound
    #[tokio::test]
    async fn test_mock_store_get_missing() {
        let store = MockDocumentStore::new();

        let result = store.get("missing.pdf").await;
        assert_eq!(
            result.unwrap_err(),
            DocumentStoreError::NotFound("missing.pdf".to_string())
        );
    }

    /// 署名付きURLにはキーと有効期限が含まれる
    #[tokio::test]
    async fn test_mock_store_presign_get() {
        let store = MockDocumentStore::new();
        store.insert_object("tenants/a/doc.pdf", b"%PDF-1.7".to_vec());

        let url = store
            .presign_get("tenants/a/doc.pdf", Duration::from_secs(900))
            .await
            .unwrap();

        assert!(url.contains("tenants/a/doc.pdf"));
        assert!(url.contains("expires=900"));
    }

    /// 存在しない文書の署名付きURLは発行しない
    #[tokio::test]
    async fn test_mock_store_presign_missing() {
        let store = MockDocumentStore::new();

        let result = store
            .presign_get("missing.pdf", Duration::from_secs(900))
            .await;
        assert!(result.is_err());
    }

    // エラーパスのテスト
    #[tokio::test]
    async fn test_mock_store_get_error() {
        let store = MockDocumentStore::new();
        store.set_next_error(DocumentStoreError::StorageError("S3 unavailable".to_string()));

        let result = store.get("any.pdf").await;
        assert_eq!(
            result.unwrap_err(),
            DocumentStoreError::StorageError("S3 unavailable".to_string())
        );
    }
}
