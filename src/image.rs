use std::fmt;

use md5::{Digest as _, Md5};
use thiserror::Error;

use crate::codec::BLOCK_DATA_LEN;

/// Largest image whose block indices still fit the identifier packing.
const MAX_IMAGE_LEN: usize = BLOCK_DATA_LEN * (1 << 26);

/// Errors returned when constructing a firmware image.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FirmwareImageError {
    /// The image has more blocks than the data-frame identifier can address.
    #[error("firmware image is too large: {len} bytes exceeds max {max}")]
    ImageTooLarge { len: usize, max: usize },
}

/// 16-byte MD5 digest of a full firmware image.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Digest([u8; 16]);

impl Digest {
    /// Computes the digest over a byte slice.
    ///
    /// ```
    /// use canflash::Digest;
    ///
    /// let digest = Digest::of(b"");
    /// assert_eq!("d41d8cd98f00b204e9800998ecf8427e", digest.to_string());
    /// ```
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut value = [0u8; 16];
        value.copy_from_slice(&Md5::digest(bytes));
        Self(value)
    }

    /// Wraps an already-computed 16-byte digest value.
    #[must_use]
    pub const fn from_bytes(value: [u8; 16]) -> Self {
        Self(value)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the digest as four 4-byte little-endian chunks, indexed 0..=3.
    ///
    /// ```
    /// use canflash::Digest;
    ///
    /// let digest = Digest::from_bytes([0; 16]);
    /// assert_eq!([0, 0, 0, 0], digest.chunks());
    /// ```
    #[must_use]
    pub fn chunks(&self) -> [u32; 4] {
        let chunk = |index: usize| {
            u32::from_le_bytes([
                self.0[index * 4],
                self.0[index * 4 + 1],
                self.0[index * 4 + 2],
                self.0[index * 4 + 3],
            ])
        };
        [chunk(0), chunk(1), chunk(2), chunk(3)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An immutable firmware image partitioned into 7-byte blocks.
///
/// The digest is computed once at construction and stays fixed for the whole
/// transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
    digest: Digest,
}

impl FirmwareImage {
    /// Creates an image from raw firmware bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the image has more blocks than the data-frame
    /// identifier packing can address.
    ///
    /// ```
    /// use canflash::FirmwareImage;
    ///
    /// let image = FirmwareImage::from_bytes(vec![0xAB; 10])?;
    /// assert_eq!(10, image.image_length());
    /// assert_eq!(2, image.block_count());
    /// # Ok::<(), canflash::FirmwareImageError>(())
    /// ```
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FirmwareImageError> {
        if bytes.len() > MAX_IMAGE_LEN {
            return Err(FirmwareImageError::ImageTooLarge {
                len: bytes.len(),
                max: MAX_IMAGE_LEN,
            });
        }

        let digest = Digest::of(&bytes);
        Ok(Self { bytes, digest })
    }

    /// Returns the image length in bytes as carried by the length info frame.
    #[must_use]
    pub fn image_length(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Returns the raw firmware bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the image digest.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Returns the number of 7-byte blocks, `ceil(len / 7)`.
    ///
    /// ```
    /// use canflash::FirmwareImage;
    ///
    /// assert_eq!(0, FirmwareImage::from_bytes(vec![])?.block_count());
    /// assert_eq!(1, FirmwareImage::from_bytes(vec![0; 7])?.block_count());
    /// assert_eq!(2, FirmwareImage::from_bytes(vec![0; 8])?.block_count());
    /// # Ok::<(), canflash::FirmwareImageError>(())
    /// ```
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.bytes.len().div_ceil(BLOCK_DATA_LEN) as u32
    }

    /// Returns block `index` zero-padded to 7 bytes, or `None` past the end.
    ///
    /// ```
    /// use canflash::FirmwareImage;
    ///
    /// let image = FirmwareImage::from_bytes((1..=10).collect())?;
    /// assert_eq!(Some([1, 2, 3, 4, 5, 6, 7]), image.block(0));
    /// assert_eq!(Some([8, 9, 10, 0, 0, 0, 0]), image.block(1));
    /// assert_eq!(None, image.block(2));
    /// # Ok::<(), canflash::FirmwareImageError>(())
    /// ```
    #[must_use]
    pub fn block(&self, index: u32) -> Option<[u8; BLOCK_DATA_LEN]> {
        if index >= self.block_count() {
            return None;
        }

        let start = index as usize * BLOCK_DATA_LEN;
        let end = (start + BLOCK_DATA_LEN).min(self.bytes.len());
        let mut block = [0u8; BLOCK_DATA_LEN];
        block[..end - start].copy_from_slice(&self.bytes[start..end]);
        Some(block)
    }
}
