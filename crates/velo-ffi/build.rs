fn main() {
    uniffi::generate_scaffolding("src/velo.udl").unwrap();
}
