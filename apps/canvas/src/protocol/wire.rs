use super::{
    DrawRequest, GridBuffer, MAX_ERROR_REASON_LEN, PixelUpdate, ProtocolError, ServerMessage,
    TAG_CONNECTED_CLIENTS, TAG_ERROR, TAG_PIXEL_UPDATE, TAG_STATE,
};

const TIMESTAMP_WIDTH: usize = 8;
const CLIENT_COUNT_WIDTH: usize = 4;

/// Grid geometry the codec needs to size and validate payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    pub grid_size: usize,
    pub palette_size: usize,
}

impl WireConfig {
    pub fn new(grid_size: usize, palette_size: usize) -> Self {
        Self {
            grid_size,
            palette_size,
        }
    }

    /// `grid_size²`, or `None` when it does not fit in `usize`.
    pub fn cell_count(&self) -> Option<usize> {
        self.grid_size.checked_mul(self.grid_size)
    }

    /// Packed snapshot length: two cells per byte, rounded up. Saturates at
    /// `usize::MAX` for grids too large to address, which no frame can match.
    pub fn snapshot_len(&self) -> usize {
        self.cell_count().map_or(usize::MAX, |cells| cells.div_ceil(2))
    }

    pub fn pixel_update_len(&self) -> usize {
        2 * coord_width(self.grid_size) + 1 + TIMESTAMP_WIDTH
    }

    fn check_color(&self, index: u8) -> Result<(), ProtocolError> {
        if (index as usize) < self.palette_size {
            Ok(())
        } else {
            Err(ProtocolError::InvalidColorIndex {
                index,
                palette_size: self.palette_size,
            })
        }
    }
}

/// Byte width of a coordinate on the wire: the narrowest of 1, 2 or 4 bytes
/// able to hold every value in `[0, grid_size)`.
pub fn coord_width(grid_size: usize) -> usize {
    if grid_size <= 1 << 8 {
        1
    } else if grid_size <= 1 << 16 {
        2
    } else {
        4
    }
}

pub fn decode_server_message(
    frame: &[u8],
    config: &WireConfig,
) -> Result<ServerMessage, ProtocolError> {
    let (&tag, payload) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    match tag {
        TAG_STATE => decode_snapshot(payload, config).map(ServerMessage::State),
        TAG_PIXEL_UPDATE => decode_pixel_update(payload, config).map(ServerMessage::PixelUpdate),
        TAG_CONNECTED_CLIENTS => {
            expect_len(payload, CLIENT_COUNT_WIDTH)?;
            let mut cursor = Cursor::new(payload);
            Ok(ServerMessage::ConnectedClients(
                cursor.read_uint(CLIENT_COUNT_WIDTH)?,
            ))
        }
        TAG_ERROR => Ok(ServerMessage::Error(decode_reason(payload))),
        other => Err(ProtocolError::UnrecognizedMessageType(other)),
    }
}

pub fn encode_server_message(message: &ServerMessage, config: &WireConfig) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(message.tag());
    match message {
        ServerMessage::State(grid) => buf.extend_from_slice(&pack_nibbles(grid.cells())),
        ServerMessage::PixelUpdate(update) => {
            let width = coord_width(config.grid_size);
            write_uint(&mut buf, update.x, width);
            write_uint(&mut buf, update.y, width);
            buf.push(update.color);
            buf.extend_from_slice(&update.timestamp_ms.to_be_bytes());
        }
        ServerMessage::ConnectedClients(count) => buf.extend_from_slice(&count.to_be_bytes()),
        ServerMessage::Error(reason) => buf.extend_from_slice(reason.as_bytes()),
    }
    buf
}

/// Encodes a draw request as `[PIXEL_UPDATE, x, y, color]`. The server stamps
/// the time, so no timestamp is sent.
pub fn encode_draw_request(
    request: &DrawRequest,
    config: &WireConfig,
) -> Result<Vec<u8>, ProtocolError> {
    let size = config.grid_size;
    if request.x as usize >= size || request.y as usize >= size {
        return Err(ProtocolError::CellOutOfBounds {
            x: request.x,
            y: request.y,
            size,
        });
    }
    config.check_color(request.color)?;
    let width = coord_width(size);
    let mut buf = Vec::with_capacity(2 + 2 * width);
    buf.push(TAG_PIXEL_UPDATE);
    write_uint(&mut buf, request.x, width);
    write_uint(&mut buf, request.y, width);
    buf.push(request.color);
    Ok(buf)
}

/// Splits each byte into two cells, high nibble first, stopping after `count`
/// cells. Fails with `Truncated` when `packed` is shorter than
/// `count.div_ceil(2)` bytes.
pub fn unpack_nibbles(packed: &[u8], count: usize) -> Result<Vec<u8>, ProtocolError> {
    let needed = count.div_ceil(2);
    if packed.len() < needed {
        return Err(ProtocolError::Truncated {
            expected: needed,
            actual: packed.len(),
        });
    }
    let cells = packed[..needed]
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0F])
        .take(count)
        .collect();
    Ok(cells)
}

/// Inverse of [`unpack_nibbles`]. An odd trailing cell leaves the low nibble zero.
pub fn pack_nibbles(cells: &[u8]) -> Vec<u8> {
    cells
        .chunks(2)
        .map(|pair| {
            let high = (pair[0] & 0x0F) << 4;
            let low = pair.get(1).map_or(0, |cell| cell & 0x0F);
            high | low
        })
        .collect()
}

fn decode_snapshot(payload: &[u8], config: &WireConfig) -> Result<GridBuffer, ProtocolError> {
    let expected = config.snapshot_len();
    let Some(count) = config.cell_count().filter(|_| payload.len() == expected) else {
        return Err(ProtocolError::MalformedSnapshot {
            expected,
            actual: payload.len(),
        });
    };
    let cells = unpack_nibbles(payload, count)?;
    if let Some(&bad) = cells
        .iter()
        .find(|&&cell| cell as usize >= config.palette_size)
    {
        return Err(ProtocolError::InvalidColorIndex {
            index: bad,
            palette_size: config.palette_size,
        });
    }
    GridBuffer::from_cells(config.grid_size, cells)
}

fn decode_pixel_update(payload: &[u8], config: &WireConfig) -> Result<PixelUpdate, ProtocolError> {
    expect_len(payload, config.pixel_update_len())?;
    let width = coord_width(config.grid_size);
    let mut cursor = Cursor::new(payload);
    let x = cursor.read_uint(width)?;
    let y = cursor.read_uint(width)?;
    let color = cursor.read_u8()?;
    let timestamp_ms = cursor.read_u64()?;
    config.check_color(color)?;
    Ok(PixelUpdate {
        x,
        y,
        color,
        timestamp_ms,
    })
}

fn decode_reason(payload: &[u8]) -> String {
    let reason = String::from_utf8_lossy(payload);
    let mut end = reason.len().min(MAX_ERROR_REASON_LEN);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

fn expect_len(payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::Truncated {
            expected,
            actual: payload.len(),
        })
    }
}

fn write_uint(buf: &mut Vec<u8>, value: u32, width: usize) {
    match width {
        1 => buf.push(value as u8),
        2 => buf.extend_from_slice(&(value as u16).to_be_bytes()),
        _ => buf.extend_from_slice(&value.to_be_bytes()),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.pos + len > self.bytes.len() {
            return Err(ProtocolError::Truncated {
                expected: self.pos + len,
                actual: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_uint(&mut self, width: usize) -> Result<u32, ProtocolError> {
        let value = self
            .read_bytes(width)?
            .iter()
            .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);
        Ok(value)
    }

    fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        let bytes = self.read_bytes(TIMESTAMP_WIDTH)?;
        let mut raw = [0u8; TIMESTAMP_WIDTH];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize) -> WireConfig {
        WireConfig::new(size, 16)
    }

    #[test_timeout::timeout]
    fn unpacks_high_nibble_first() {
        assert_eq!(
            unpack_nibbles(&[0x12, 0x34, 0x56, 0x78], 8),
            Ok(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert_eq!(unpack_nibbles(&[0xAB, 0xCD], 3), Ok(vec![10, 11, 12]));
    }

    #[test_timeout::timeout]
    fn short_packed_input_is_truncated() {
        assert_eq!(
            unpack_nibbles(&[0x12], 4),
            Err(ProtocolError::Truncated {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(unpack_nibbles(&[], 0), Ok(Vec::new()));
    }

    #[test_timeout::timeout]
    fn unaddressable_grid_never_matches_a_snapshot() {
        let cfg = WireConfig::new(1 << 33, 16);
        assert_eq!(cfg.cell_count(), None);
        assert_eq!(cfg.snapshot_len(), usize::MAX);
        assert!(matches!(
            decode_server_message(&[TAG_STATE, 0x12], &cfg),
            Err(ProtocolError::MalformedSnapshot { .. })
        ));
    }

    #[test_timeout::timeout]
    fn decodes_size_four_snapshot_row_major() {
        let mut frame = vec![TAG_STATE, 0x12, 0x34, 0x56, 0x78];
        frame.extend_from_slice(&[0x9A, 0xBC, 0xDE, 0xF0]);
        let decoded = decode_server_message(&frame, &config(4)).expect("decode");
        let ServerMessage::State(grid) = decoded else {
            panic!("expected snapshot, got {decoded:?}");
        };
        assert_eq!(grid.size(), 4);
        assert_eq!(&grid.cells()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(grid.get(0, 2), Some(9));
        assert_eq!(grid.get(3, 3), Some(0));
    }

    #[test_timeout::timeout]
    fn snapshot_round_trips_odd_sized_grid() {
        let cfg = config(5);
        let cells: Vec<u8> = (0..25).map(|i| (i * 7 % 16) as u8).collect();
        let grid = GridBuffer::from_cells(5, cells.clone()).expect("grid");
        let encoded = encode_server_message(&ServerMessage::State(grid.clone()), &cfg);
        assert_eq!(encoded.len(), 1 + 13);
        let decoded = decode_server_message(&encoded, &cfg).expect("decode");
        assert_eq!(decoded, ServerMessage::State(grid));
    }

    #[test_timeout::timeout]
    fn snapshot_length_mismatch_is_malformed() {
        let err = decode_server_message(&[TAG_STATE, 0x12, 0x34], &config(4)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MalformedSnapshot {
                expected: 8,
                actual: 2
            }
        );
    }

    #[test_timeout::timeout]
    fn snapshot_with_color_outside_palette_is_rejected() {
        let cfg = WireConfig::new(2, 4);
        let err = decode_server_message(&[TAG_STATE, 0x01, 0x70], &cfg).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidColorIndex {
                index: 7,
                palette_size: 4
            }
        );
    }

    #[test_timeout::timeout]
    fn pixel_update_uses_two_byte_coordinates_for_large_grids() {
        let cfg = config(1000);
        let update = PixelUpdate {
            x: 999,
            y: 256,
            color: 15,
            timestamp_ms: 1_700_000_000_123,
        };
        let encoded = encode_server_message(&ServerMessage::PixelUpdate(update), &cfg);
        assert_eq!(encoded.len(), 1 + 2 + 2 + 1 + 8);
        assert_eq!(&encoded[1..5], &[0x03, 0xE7, 0x01, 0x00]);
        let decoded = decode_server_message(&encoded, &cfg).expect("decode");
        assert_eq!(decoded, ServerMessage::PixelUpdate(update));
    }

    #[test_timeout::timeout]
    fn pixel_update_with_bad_color_is_rejected() {
        let cfg = WireConfig::new(100, 8);
        let frame = [TAG_PIXEL_UPDATE, 3, 4, 8, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(
            decode_server_message(&frame, &cfg).unwrap_err(),
            ProtocolError::InvalidColorIndex {
                index: 8,
                palette_size: 8
            }
        );
    }

    #[test_timeout::timeout]
    fn short_pixel_update_is_truncated() {
        let err = decode_server_message(&[TAG_PIXEL_UPDATE, 1, 2, 3], &config(100)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                expected: 11,
                actual: 3
            }
        );
    }

    #[test_timeout::timeout]
    fn connected_clients_and_error_frames() {
        let cfg = config(100);
        assert_eq!(
            decode_server_message(&[TAG_CONNECTED_CLIENTS, 0, 0, 1, 2], &cfg).unwrap(),
            ServerMessage::ConnectedClients(258)
        );
        let mut frame = vec![TAG_ERROR];
        frame.extend_from_slice(b"rate_limited");
        assert_eq!(
            decode_server_message(&frame, &cfg).unwrap(),
            ServerMessage::Error("rate_limited".into())
        );
    }

    #[test_timeout::timeout]
    fn long_error_reason_is_cut_on_char_boundary() {
        let mut frame = vec![TAG_ERROR];
        frame.extend_from_slice("é".repeat(200).as_bytes());
        let ServerMessage::Error(reason) = decode_server_message(&frame, &config(10)).unwrap()
        else {
            panic!("expected error message");
        };
        assert_eq!(reason.len(), MAX_ERROR_REASON_LEN);
        assert_eq!(reason.chars().count(), 128);
    }

    #[test_timeout::timeout]
    fn unknown_and_empty_frames() {
        assert_eq!(
            decode_server_message(&[3, 1, 2], &config(10)).unwrap_err(),
            ProtocolError::UnrecognizedMessageType(3)
        );
        assert_eq!(
            decode_server_message(&[], &config(10)).unwrap_err(),
            ProtocolError::EmptyFrame
        );
    }

    #[test_timeout::timeout]
    fn draw_request_encoding_validates_cell_and_color() {
        let cfg = WireConfig::new(100, 16);
        let request = DrawRequest {
            x: 10,
            y: 99,
            color: 5,
        };
        assert_eq!(
            encode_draw_request(&request, &cfg).unwrap(),
            vec![TAG_PIXEL_UPDATE, 10, 99, 5]
        );
        assert!(matches!(
            encode_draw_request(&DrawRequest { x: 100, ..request }, &cfg),
            Err(ProtocolError::CellOutOfBounds { x: 100, .. })
        ));
        assert!(matches!(
            encode_draw_request(&DrawRequest { color: 16, ..request }, &cfg),
            Err(ProtocolError::InvalidColorIndex { index: 16, .. })
        ));
    }

    #[test_timeout::timeout]
    fn coordinate_width_covers_grid() {
        assert_eq!(coord_width(100), 1);
        assert_eq!(coord_width(256), 1);
        assert_eq!(coord_width(257), 2);
        assert_eq!(coord_width(65_536), 2);
        assert_eq!(coord_width(65_537), 4);
    }
}
