//! KMS `Decrypt` as a [`SecretDecryptor`].

use std::collections::HashMap;

use aws_sdk_kms::Client;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;

use super::AwsContext;
use crate::config::EncryptionContext;
use crate::credentials::{DecryptError, SecretDecryptor};

/// Decrypts ciphertext blobs with the KMS key they were encrypted under.
#[derive(Debug, Clone)]
pub struct KmsDecryptor {
    aws: AwsContext,
}

impl KmsDecryptor {
    pub fn new(aws: AwsContext) -> Self {
        Self { aws }
    }
}

fn context_map(context: &EncryptionContext) -> HashMap<String, String> {
    context.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn plaintext_string(plaintext: Option<&Blob>) -> Result<String, DecryptError> {
    let blob = plaintext.ok_or_else(|| DecryptError("decrypt returned no plaintext".to_string()))?;
    String::from_utf8(blob.as_ref().to_vec())
        .map_err(|_| DecryptError("plaintext is not valid UTF-8".to_string()))
}

impl SecretDecryptor for KmsDecryptor {
    fn decrypt(
        &self,
        region: &str,
        ciphertext: &[u8],
        context: Option<&EncryptionContext>,
    ) -> Result<String, DecryptError> {
        let client = Client::new(&self.aws.sdk_config(region));
        let request = client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .set_encryption_context(context.map(context_map));

        let output = self
            .aws
            .block_on(request.send())
            .map_err(|e| DecryptError(DisplayErrorContext(&e).to_string()))?;
        plaintext_string(output.plaintext())
    }
}
