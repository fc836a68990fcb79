//! Procedural macros for the Herald event bus.
//!
//! - `#[derive(Payload)]`: Implements `herald::Payload` for your type, preserving generics and bounds.
//!   For enums, also generates `event_type()` returning the variant's event type.
//!
//! Usage:
//! ```rust,ignore
//! use herald::Payload;
//!
//! // Struct payload bound to a single event type
//! #[derive(Clone, Debug, Payload)]
//! #[event_type = "user.created"]
//! struct UserCreated { id: String }
//!
//! // Enum payload, one event type per variant
//! #[derive(Clone, Debug, Payload)]
//! enum AccountEvent {
//!     #[event_type = "role.assigned"]
//!     RoleAssigned { user_id: String, role: String },
//!     PasswordReset(String), // event type "PasswordReset"
//! }
//! ```
use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Expr, ExprLit, Fields, Lit, Meta, parse_macro_input};

#[proc_macro_derive(Payload, attributes(event_type))]
pub fn derive_payload(input: TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = input.ident.clone();
    let generics = input.generics.clone();

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let event_type_impl = match &input.data {
        Data::Enum(data_enum) => {
            let mut match_arms = Vec::with_capacity(data_enum.variants.len());
            for variant in &data_enum.variants {
                let variant_ident = &variant.ident;
                let event_type = match event_type_attr(&variant.attrs) {
                    Ok(Some(value)) => value,
                    Ok(None) => variant_ident.to_string(),
                    Err(err) => return err.to_compile_error().into(),
                };

                let pattern = match &variant.fields {
                    Fields::Unit => quote! { Self::#variant_ident },
                    Fields::Unnamed(_) => quote! { Self::#variant_ident(..) },
                    Fields::Named(_) => quote! { Self::#variant_ident { .. } },
                };

                match_arms.push(quote! {
                    #pattern => ::std::option::Option::Some(::std::borrow::Cow::Borrowed(#event_type))
                });
            }

            quote! {
                fn event_type(&self) -> ::std::option::Option<::std::borrow::Cow<'static, str>> {
                    match self {
                        #(#match_arms),*
                    }
                }
            }
        }
        _ => match event_type_attr(&input.attrs) {
            Ok(Some(event_type)) => quote! {
                fn event_type(&self) -> ::std::option::Option<::std::borrow::Cow<'static, str>> {
                    ::std::option::Option::Some(::std::borrow::Cow::Borrowed(#event_type))
                }
            },
            // Without the attribute the default (no declared type) applies
            Ok(None) => quote! {},
            Err(err) => return err.to_compile_error().into(),
        },
    };

    let expanded = quote! {
        impl #impl_generics herald::Payload for #ident #ty_generics #where_clause {
            #event_type_impl
        }
    };
    TokenStream::from(expanded)
}

/// Reads `#[event_type = "..."]` from a list of attributes.
fn event_type_attr(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    for attr in attrs {
        if !attr.path().is_ident("event_type") {
            continue;
        }
        return match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Ok(Some(s.value())),
                other => Err(syn::Error::new_spanned(
                    other,
                    "expected a string literal, e.g. #[event_type = \"user.created\"]",
                )),
            },
            other => Err(syn::Error::new_spanned(
                other,
                "expected #[event_type = \"...\"]",
            )),
        };
    }
    Ok(None)
}
