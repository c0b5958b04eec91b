fn main() {
    uniffi::generate_scaffolding("src/classroom.udl").unwrap();
}
