//! Prints a fresh Ed25519 key pair for `JWT_PRIVATE_KEY` / `JWT_PUBLIC_KEY`.

use catalog_identity::services::jwt::generate_ed25519_pem_pair;

fn main() {
    match generate_ed25519_pem_pair() {
        Ok((private_pem, public_pem)) => {
            print!("{private_pem}");
            print!("{public_pem}");
        }
        Err(e) => {
            eprintln!("key generation failed: {e}");
            std::process::exit(1);
        }
    }
}
