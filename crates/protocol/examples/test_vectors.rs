//! Generate frame test vectors for device firmware interop testing.
//!
//! Run with: cargo run --package blufi-protocol --example test_vectors

use blufi_protocol::checksum;
use blufi_protocol::framing::{control, data};
use blufi_protocol::{
    Frame, FrameCodec, FrameControl, FrameType, KeyAgreement, SecurityMode, StreamCipher,
};

fn main() {
    let codec = FrameCodec::new();

    // Test vector 1: CRC16 check value over "123456789"
    let mut crc_input = vec![0xAA, 0xBB];
    crc_input.extend_from_slice(b"123456789");
    println!(
        "// crc16(\"123456789\") = {:#06x}",
        checksum::compute(&crc_input)
    );

    // Test vector 2: Security mode announcement
    let security = Frame::with_control(
        FrameType::Control,
        control::SET_SECURITY_MODE,
        FrameControl::new().with_checksum(true),
        0,
        vec![SecurityMode::default().as_byte()],
    );
    print_test_vector("set_security_mode", &codec.encode(&security).expect("encode failed"));

    // Test vector 3: Wi-Fi list request
    let wifi_list = Frame::new(FrameType::Control, control::GET_WIFI_LIST, 1, vec![]);
    print_test_vector("get_wifi_list", &codec.encode(&wifi_list).expect("encode failed"));

    // Test vector 4: Encrypted SSID with the key from private exponent 2, peer 3
    let key = KeyAgreement::from_private_exponent(&[0x02])
        .derive_key(&[0x03])
        .expect("key derivation failed");
    let cipher = StreamCipher::new(&key);
    let mut ssid = Frame::with_control(
        FrameType::Data,
        data::STA_SSID,
        FrameControl::new().with_encrypted(true).with_checksum(true),
        2,
        b"home-net".to_vec(),
    );
    ssid.checksum = Some(ssid.compute_checksum());
    ssid.payload = cipher.encrypt(&ssid.payload, ssid.sequence);
    print_test_vector("sta_ssid_encrypted", &codec.encode(&ssid).expect("encode failed"));
}

fn print_test_vector(name: &str, bytes: &[u8]) {
    print!("const {}: [u8; {}] = [", name.to_uppercase(), bytes.len());
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            print!(", ");
        }
        print!("{:#04x}", b);
    }
    println!("];");
}
