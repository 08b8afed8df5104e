use crate::utils::{apply_derives, ensure_leading_field};
use proc_macro::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{Fields, ItemStruct, LitBool, Result, Type, parse_macro_input};

/// #[entity] 宏实现
/// - 标识字段 `id` 总是位于最前，缺失时按 `id = ...` 指定的类型补上
/// - 派生 `Default`（`new` 靠它填充其余字段），`debug = false` 以外同时派生 `Debug`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = EntityArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let mut st = match syn::parse::<ItemStruct>(item) {
        Ok(st) => st,
        Err(err) => {
            return syn::Error::new(err.span(), "#[entity] only on struct")
                .to_compile_error()
                .into();
        }
    };

    match expand_struct(&mut st, args) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_struct(st: &mut ItemStruct, args: EntityArgs) -> Result<proc_macro2::TokenStream> {
    let span = st.span();
    let Fields::Named(fields) = &mut st.fields else {
        return Err(syn::Error::new(span, "#[entity] requires named fields"));
    };

    let id_type = args.id.unwrap_or_else(|| syn::parse_quote!(String));
    ensure_leading_field(fields, "id", &id_type);

    let mut required: Vec<syn::Path> = Vec::with_capacity(2);
    if args.debug.unwrap_or(true) {
        required.push(syn::parse_quote!(Debug));
    }
    required.push(syn::parse_quote!(Default));
    apply_derives(&mut st.attrs, required);

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    Ok(quote! {
        #st

        impl #impl_generics ::eda_domain::entity::Entity for #ident #ty_generics #where_clause {
            type Id = #id_type;

            fn new(id: Self::Id) -> Self {
                Self { id, ..::core::default::Default::default() }
            }

            fn id(&self) -> &Self::Id {
                &self.id
            }
        }
    })
}

#[derive(Default)]
struct EntityArgs {
    id: Option<Type>,
    debug: Option<bool>,
}

impl EntityArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("id") {
            if self.id.is_some() {
                return Err(meta.error("duplicate `id`"));
            }
            self.id = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("debug") {
            if self.debug.is_some() {
                return Err(meta.error("duplicate `debug`"));
            }
            let flag: LitBool = meta.value()?.parse()?;
            self.debug = Some(flag.value);
            Ok(())
        } else {
            Err(meta.error("expected `id` or `debug`"))
        }
    }
}
