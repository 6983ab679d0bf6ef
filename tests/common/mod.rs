use std::error::Error;

use ldap3::{LdapConnAsync, Scope, SearchEntry};

pub const SOURCE_URL: &str = "ldap://localhost:1389";
pub const TARGET_URL: &str = "ldap://localhost:2389";
pub const BASE_DN: &str = "dc=example,dc=org";
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
pub const ADMIN_PASSWORD: &str = "adminpassword";

pub async fn ldap_connect(url: &str) -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new(url).await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind(ADMIN_DN, ADMIN_PASSWORD).await?.success()?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={ou},{BASE_DN}"),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={ou},{BASE_DN}")).await?.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	ou: &str,
	cn: &str,
	sn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={cn},ou={ou},{BASE_DN}"),
		vec![("objectClass", ["inetOrgPerson"].into()), ("sn", [sn].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_entry(ldap: &mut ldap3::Ldap, dn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(dn).await?.success()?;
	Ok(())
}

/// Base-scope read of one entry, or `None` when the DN does not exist.
pub async fn ldap_find_entry(
	ldap: &mut ldap3::Ldap,
	dn: &str,
) -> Result<Option<SearchEntry>, Box<dyn Error>> {
	let result = ldap.search(dn, Scope::Base, "(objectClass=*)", vec!["*"]).await?;
	match result.success() {
		Ok((entries, _)) => Ok(entries.into_iter().next().map(SearchEntry::construct)),
		Err(ldap3::LdapError::LdapResult { result }) if result.rc == 32 => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Poll the target until `dn` appears, for up to 15 seconds.
pub async fn wait_for_entry(
	ldap: &mut ldap3::Ldap,
	dn: &str,
) -> Result<Option<SearchEntry>, Box<dyn Error>> {
	for _ in 0..30 {
		if let Some(entry) = ldap_find_entry(ldap, dn).await? {
			return Ok(Some(entry));
		}
		tokio::time::sleep(std::time::Duration::from_millis(500)).await;
	}
	Ok(None)
}
