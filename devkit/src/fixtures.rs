/*!
Sorties de diagnostic réalistes

Reproduit la forme de `devcon.exe Status =Image` (lignes CRLF) et de
`system_profiler SPCameraDataType` pour une liste de noms de caméras.
*/

/// Sortie `devcon.exe Status =Image`, une entrée par caméra.
pub fn devcon_status(cameras: &[&str]) -> String {
    let mut out = String::new();
    for (i, name) in cameras.iter().enumerate() {
        out.push_str(&format!("USB\\VID_046D&PID_0825&MI_00\\7&1A2B3C4D&0&000{i}\r\n"));
        out.push_str(&format!("    Name: {name}\r\n"));
        out.push_str("    Driver is running.\r\n");
    }
    if cameras.is_empty() {
        out.push_str("No matching devices found.\r\n");
    } else {
        out.push_str(&format!("{} matching device(s) found.\r\n", cameras.len()));
    }
    out
}

/// Sortie `system_profiler SPCameraDataType`.
pub fn system_profiler_cameras(cameras: &[&str]) -> String {
    let mut out = String::from("Camera:\n\n");
    for (i, name) in cameras.iter().enumerate() {
        out.push_str(&format!("    {name}:\n\n"));
        out.push_str(&format!("      Model ID: {name}\n"));
        out.push_str(&format!("      Unique ID: 0x80200000{i:02}5ac8514\n\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devcon_fixture_shape() {
        let out = devcon_status(&["Logitech Webcam C270"]);
        assert!(out.contains("    Name: Logitech Webcam C270\r\n"));
        assert!(out.ends_with("1 matching device(s) found.\r\n"));
        assert!(!devcon_status(&[]).contains("Name:"));
    }

    #[test]
    fn test_system_profiler_fixture_shape() {
        let out = system_profiler_cameras(&["FaceTime HD Camera", "USB Camera"]);
        assert_eq!(out.matches("Model ID: ").count(), 2);
    }
}
