// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use image::{GrayImage, Luma};
use libfuzzer_sys::fuzz_target;
use rpa4you::detection::{CascadeParams, HaarCascade};

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that parses must also scan without panicking
    if let Ok(cascade) = HaarCascade::from_xml(xml) {
        let image = GrayImage::from_fn(48, 32, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let params = CascadeParams { min_size: 0, min_neighbors: 1, ..CascadeParams::default() };
        let _ = cascade.detect(&image, &params);
    }
});
