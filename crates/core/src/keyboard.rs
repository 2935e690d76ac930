/// Computer-keyboard layout for playing notes: the home row holds the white
/// keys from middle C, the row above the black keys.
const KEY_NOTES: [(&str, u8); 13] = [
    ("KeyA", 60),
    ("KeyW", 61),
    ("KeyS", 62),
    ("KeyE", 63),
    ("KeyD", 64),
    ("KeyF", 65),
    ("KeyT", 66),
    ("KeyG", 67),
    ("KeyY", 68),
    ("KeyH", 69),
    ("KeyU", 70),
    ("KeyJ", 71),
    ("KeyK", 72),
];

/// MIDI note for a key code (`KeyboardEvent.code` naming), shifted by
/// `octave` octaves. `None` for unmapped keys or notes outside 0..=127.
pub fn note_for_key(code: &str, octave: i8) -> Option<u8> {
    let (_, note) = KEY_NOTES.iter().find(|(key, _)| *key == code)?;
    let shifted = *note as i16 + octave as i16 * 12;
    u8::try_from(shifted).ok().filter(|n| *n <= 127)
}

/// Every mapped key code, lowest note first.
pub fn mapped_keys() -> impl Iterator<Item = (&'static str, u8)> {
    KEY_NOTES.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_row_is_chromatic_from_middle_c() {
        let notes: Vec<u8> = mapped_keys().map(|(_, n)| n).collect();
        assert_eq!(notes, (60..=72).collect::<Vec<_>>());
        assert_eq!(note_for_key("KeyA", 0), Some(60));
        assert_eq!(note_for_key("KeyK", 0), Some(72));
    }

    #[test]
    fn test_octave_shift_and_bounds() {
        assert_eq!(note_for_key("KeyA", -1), Some(48));
        assert_eq!(note_for_key("KeyA", 5), Some(120));
        assert_eq!(note_for_key("KeyK", 5), None);
        assert_eq!(note_for_key("KeyA", -6), None);
        assert_eq!(note_for_key("Space", 0), None);
    }
}
